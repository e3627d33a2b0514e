//! リクエストコンテキスト（受信リクエストのリクエスト単位の束縛）

use std::any::Any;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::error::Error;
use super::cookie::parse_cookie_header;
use super::environ::Environ;
use super::params::{
    collect_pairs, multipart_boundary, parse_multipart, parse_query_string, FileUpload, MultiDict,
    ParamValue,
};

/// リクエストコンテキスト
///
/// リクエストごとに新しく作られ、遅延解析されるフィールド（クエリ・クッキー・ボディ）は
/// リクエスト内で一度だけ計算される。
pub struct RequestContext {
    method: String,
    path: String,
    environ: Environ,
    max_body_size: usize,
    query: OnceCell<HashMap<String, ParamValue>>,
    cookies: OnceCell<HashMap<String, String>>,
    body: Option<Bytes>,
    form: Option<ParsedForm>,
    locals: HashMap<String, Box<dyn Any + Send + Sync>>,
}

#[derive(Default)]
struct ParsedForm {
    fields: HashMap<String, ParamValue>,
    uploads: HashMap<String, Vec<FileUpload>>,
}

impl RequestContext {
    /// Environを束縛して新しいコンテキストを作成
    pub fn bind(environ: Environ, max_body_size: usize) -> Self {
        let method = match environ.method.trim() {
            "" => "GET".to_string(),
            m => m.to_ascii_uppercase(),
        };
        let path = format!("/{}", environ.path.trim().trim_start_matches('/'));
        debug!("Bound request: {} {}", method, path);

        Self {
            method,
            path,
            environ,
            max_body_size,
            query: OnceCell::new(),
            cookies: OnceCell::new(),
            body: None,
            form: None,
            locals: HashMap::new(),
        }
    }

    /// 大文字化されたHTTPメソッド
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 先頭スラッシュ付きに正規化されたパス
    pub fn path(&self) -> &str {
        &self.path
    }

    /// ヘッダー値を取得（大文字小文字区別なし）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.environ.header(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// URLデコード済みのクエリパラメータ
    pub fn query(&self) -> &HashMap<String, ParamValue> {
        self.query
            .get_or_init(|| parse_query_string(&self.environ.query_string))
    }

    /// クエリパラメータの単一値を取得
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query().get(key).map(ParamValue::as_str)
    }

    /// `Cookie` ヘッダーから解析したクッキー
    pub fn cookies(&self) -> &HashMap<String, String> {
        self.cookies.get_or_init(|| {
            self.environ
                .header("cookie")
                .map(parse_cookie_header)
                .unwrap_or_default()
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(String::as_str)
    }

    /// 生のリクエストボディ（gzipは展開済み）
    ///
    /// 上限を超えるボディは `PayloadTooLarge` になる。
    pub fn body_bytes(&mut self) -> Result<&Bytes, Error> {
        if self.body.is_none() {
            let body = self.read_body()?;
            self.body = Some(body);
        }
        Ok(self.body.get_or_insert_with(Bytes::new))
    }

    fn read_body(&mut self) -> Result<Bytes, Error> {
        let limit = self.max_body_size;
        if let Some(len) = self.environ.content_length {
            if len > limit {
                warn!("Request body too large: {} bytes (limit {})", len, limit);
                return Err(Error::PayloadTooLarge(format!(
                    "Request body exceeds the limit of {} bytes",
                    limit
                )));
            }
        }

        let input = self.environ.take_input();
        let mut raw = Vec::new();
        read_bounded(input, limit, &mut raw)?;

        let gzipped = self
            .header("content-encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        if !gzipped || raw.is_empty() {
            return Ok(Bytes::from(raw));
        }

        let mut decoded = Vec::new();
        read_bounded(GzDecoder::new(&raw[..]), limit, &mut decoded).map_err(|e| match e {
            Error::Io(io) => Error::InvalidRequestBody(format!("Failed to decode gzip body: {}", io)),
            other => other,
        })?;
        debug!("Decoded gzip request body: {} -> {} bytes", raw.len(), decoded.len());
        Ok(Bytes::from(decoded))
    }

    /// ボディをJSONとしてデシリアライズ
    pub fn json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        if let Some(ct) = self.content_type() {
            if !is_json_like_content_type(ct) {
                return Err(Error::InvalidRequestBody(format!(
                    "Unsupported Content-Type: {} (expected application/json or *+json)",
                    ct
                )));
            }
        }
        let body = self.body_bytes()?;
        if body.is_empty() {
            return Err(Error::InvalidRequestBody("Missing request body".to_string()));
        }
        serde_json::from_slice(body).map_err(|e| Error::InvalidRequestBody(e.to_string()))
    }

    /// フォームパラメータ（urlencoded / multipart の文字列フィールド）
    pub fn form(&mut self) -> Result<&HashMap<String, ParamValue>, Error> {
        Ok(&self.parsed_form()?.fields)
    }

    /// multipartでアップロードされたファイル（フィールド名ごと、送信順）
    pub fn uploads(&mut self) -> Result<&HashMap<String, Vec<FileUpload>>, Error> {
        Ok(&self.parsed_form()?.uploads)
    }

    fn parsed_form(&mut self) -> Result<&ParsedForm, Error> {
        if self.form.is_none() {
            let form = self.parse_form()?;
            self.form = Some(form);
        }
        Ok(self.form.get_or_insert_with(ParsedForm::default))
    }

    fn parse_form(&mut self) -> Result<ParsedForm, Error> {
        let content_type = self
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_default();
        let main_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match main_type.as_str() {
            "application/x-www-form-urlencoded" => {
                let body = self.body_bytes()?;
                Ok(ParsedForm {
                    fields: collect_pairs(&String::from_utf8_lossy(body)).demote(),
                    uploads: HashMap::new(),
                })
            }
            "multipart/form-data" => {
                let boundary = multipart_boundary(&content_type).ok_or_else(|| {
                    Error::InvalidRequestBody("multipart body without boundary".to_string())
                })?;
                let body = self.body_bytes()?.clone();

                let mut fields = MultiDict::new();
                let mut uploads = MultiDict::new();
                for part in parse_multipart(&body, &boundary)? {
                    match part.filename {
                        Some(filename) => uploads.push(
                            part.name.clone(),
                            FileUpload {
                                name: part.name,
                                filename,
                                content_type: part.content_type,
                                data: part.data,
                            },
                        ),
                        None => fields.push(part.name, String::from_utf8_lossy(&part.data).into_owned()),
                    }
                }
                Ok(ParsedForm {
                    fields: fields.demote(),
                    uploads: uploads.into_lists(),
                })
            }
            _ => Ok(ParsedForm::default()),
        }
    }

    /// 生の記述子へのアクセス
    pub fn environ(&self) -> &Environ {
        &self.environ
    }

    pub fn environ_mut(&mut self) -> &mut Environ {
        &mut self.environ
    }

    /// リクエスト内で共有する値を設定
    pub fn set_local<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.locals.insert(key.to_string(), Box::new(value));
    }

    /// リクエスト内で共有する値を取得
    pub fn local<T: 'static>(&self, key: &str) -> Option<&T> {
        self.locals
            .get(key)
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// 値を削除して返却
    pub fn remove_local<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.locals
            .remove(key)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}

/// `limit` バイトを超えたら `PayloadTooLarge`
fn read_bounded<R: Read>(reader: R, limit: usize, out: &mut Vec<u8>) -> Result<(), Error> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    reader.take(cap).read_to_end(out)?;
    if out.len() > limit {
        warn!("Request body exceeded the limit of {} bytes", limit);
        return Err(Error::PayloadTooLarge(format!(
            "Request body exceeds the limit of {} bytes",
            limit
        )));
    }
    Ok(())
}

/// Content-Typeの許容範囲を判定
pub fn is_json_like_content_type(ct: &str) -> bool {
    let main_type = ct
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    const EXTRA_ALLOWED: &[&str] = &["application/json-seq"];

    main_type == "application/json"
        || main_type.ends_with("+json")
        || EXTRA_ALLOWED.contains(&main_type.as_str())
}
