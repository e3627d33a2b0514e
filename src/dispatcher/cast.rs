//! ハンドラー出力をバイトチャンク列へ変換する

use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use serde_json::Value;

use crate::common::utils::encode_text;
use crate::common::{Body, FileWrapper, ResponseContext, CHUNK_SIZE};
use crate::error::Error;
use crate::handler::Output;

/// キャストに必要なリクエスト側の情報
pub(crate) struct CastEnv<'a> {
    pub autojson: bool,
    pub route: &'a str,
    pub file_wrapper: Option<&'a Arc<dyn FileWrapper>>,
}

/// 出力を正規化する
///
/// 1. auto-JSONが有効でマッピング → JSON文字列（`application/json`）
/// 2. 空・偽値 → 空の列（`Content-Length: 0`）
/// 3. テキスト・バイト列 → 1要素の列
/// 4. テキストの列 → 要素ごとにエンコード
/// 5. ストリーム → 8192バイトごとの遅延チャンク（ゲートウェイのfile wrapper優先）
///
/// 1要素の結果には `Content-Length` を設定する。
pub(crate) fn cast(output: Output, response: &mut ResponseContext, env: &CastEnv<'_>) -> Result<Body, Error> {
    let chunks = match output {
        Output::Json(Value::Object(map)) if env.autojson => {
            let text = serde_json::to_string(&map).map_err(Error::handler)?;
            response.set_content_type("application/json");
            vec![Bytes::from(text)]
        }
        ref falsy if is_falsy(falsy) => {
            response.headers_mut().set("Content-Length", "0");
            return Ok(Body::empty());
        }
        Output::Text(text) | Output::Json(Value::String(text)) => {
            vec![Bytes::from(encode_text(&text, response.charset())?)]
        }
        Output::Bytes(bytes) => vec![bytes],
        Output::Lines(lines) => encode_lines(&lines, response.charset())?,
        Output::Json(Value::Array(items)) if items.iter().all(Value::is_string) => {
            let lines: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            encode_lines(&lines, response.charset())?
        }
        Output::Stream(reader) => {
            debug!("Streaming response for {} in {} byte chunks", env.route, CHUNK_SIZE);
            return Ok(match env.file_wrapper {
                Some(wrapper) => wrapper.wrap(reader, CHUNK_SIZE),
                None => Body::from_reader(reader, CHUNK_SIZE),
            });
        }
        unsupported @ Output::Json(_) => {
            return Err(Error::OutputType {
                route: env.route.to_string(),
                type_name: unsupported.kind().to_string(),
            })
        }
        Output::Empty => Vec::new(),
    };

    if chunks.len() == 1 {
        response
            .headers_mut()
            .set("Content-Length", chunks[0].len().to_string());
    }
    Ok(Body::from_chunks(chunks))
}

/// 早期終了の出力をそのままボディにする（ヘッダーは変更しない）
pub(crate) fn raw_body(output: Output, response: &ResponseContext, env: &CastEnv<'_>) -> Result<Body, Error> {
    let chunks = match output {
        Output::Empty => Vec::new(),
        Output::Text(text) => vec![Bytes::from(encode_text(&text, response.charset())?)],
        Output::Bytes(bytes) => vec![bytes],
        Output::Lines(lines) => encode_lines(&lines, response.charset())?,
        Output::Json(Value::String(text)) => vec![Bytes::from(encode_text(&text, response.charset())?)],
        Output::Json(value) => vec![Bytes::from(serde_json::to_vec(&value).map_err(Error::handler)?)],
        Output::Stream(reader) => {
            return Ok(match env.file_wrapper {
                Some(wrapper) => wrapper.wrap(reader, CHUNK_SIZE),
                None => Body::from_reader(reader, CHUNK_SIZE),
            })
        }
    };
    Ok(Body::from_chunks(chunks))
}

fn encode_lines<S: AsRef<str>>(lines: &[S], charset: &str) -> Result<Vec<Bytes>, Error> {
    lines
        .iter()
        .map(|line| encode_text(line.as_ref(), charset).map(Bytes::from))
        .collect()
}

/// 空または偽とみなす出力か
fn is_falsy(output: &Output) -> bool {
    match output {
        Output::Empty => true,
        Output::Text(text) => text.is_empty(),
        Output::Bytes(bytes) => bytes.is_empty(),
        Output::Lines(lines) => lines.is_empty(),
        Output::Stream(_) => false,
        Output::Json(value) => match value {
            Value::Null => true,
            Value::Bool(flag) => !flag,
            Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
        },
    }
}
