//! CGIレスポンスの出力機能

use std::io::{self, Write};

use bytes::Bytes;
use log::error;

use crate::common::{reason_phrase, Body};
use crate::dispatcher::GatewayResponse;
use crate::error::Error;
use super::error_logging::log_error_to_file;
use super::validation::{is_valid_header_name, is_valid_header_value};

/// プレーンテキストの応答を組み立てる（ディスパッチャー外の失敗用）
pub fn plain_response(status: u16, message: &str) -> GatewayResponse {
    let reason = reason_phrase(status).unwrap_or("Unknown");
    GatewayResponse {
        status_line: format!("{} {}", status, reason),
        headers: vec![
            ("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()),
            ("Content-Length".to_string(), message.len().to_string()),
        ],
        body: Body::from_chunks(vec![Bytes::copy_from_slice(message.as_bytes())]),
    }
}

/// レスポンスを任意のライターへ書き出す
///
/// 不正なヘッダーを含む場合は何も出力せず400の応答に差し替える。
/// ボディはチャンクごとに書き出す。
pub fn write_response_to<W: Write>(response: GatewayResponse, out: &mut W) -> Result<(), Error> {
    let mut response = response;
    for (name, value) in &response.headers {
        if !is_valid_header_name(name) || !is_valid_header_value(value) {
            error!("Invalid header detected - name: '{}', value: '{:?}'", name, value);
            log_error_to_file(&format!(
                "CRLF injection attempt detected in header: '{}': '{:?}'",
                name, value
            ));
            response = plain_response(400, "Bad Request: Invalid header");
            break;
        }
    }

    out.write_all(format!("Status: {}\r\n", response.status_line).as_bytes())
        .map_err(|e| Error::InternalServerError(format!("Failed to write status line: {}", e)))?;

    for (name, value) in &response.headers {
        // 予約ヘッダーはアプリ指定を無視
        if name.eq_ignore_ascii_case("Status") {
            continue;
        }
        out.write_all(format!("{}: {}\r\n", name, value).as_bytes())
            .map_err(|e| Error::InternalServerError(format!("Failed to write header: {}", e)))?;
    }

    out.write_all(b"\r\n").map_err(|e| {
        Error::InternalServerError(format!("Failed to write header/body separator: {}", e))
    })?;

    for chunk in response.body {
        let chunk = chunk.map_err(|e| {
            Error::InternalServerError(format!("Failed to read response body: {}", e))
        })?;
        out.write_all(&chunk).map_err(|e| {
            Error::InternalServerError(format!("Failed to write response body: {}", e))
        })?;
    }

    Ok(())
}

/// レスポンスを標準出力に書き出す
pub fn write_response(response: GatewayResponse) -> Result<(), Error> {
    let mut out = io::stdout().lock();
    let res = write_response_to(response, &mut out);
    out.flush().map_err(|e| Error::InternalServerError(format!("Failed to flush stdout: {}", e)))?;
    res
}
