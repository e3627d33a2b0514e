//! 共通ユーティリティ関数群（URLデコード、文字コード変換、環境設定 等）

use std::env;
use crate::error::Error;

/// リクエストボディのデフォルト上限（5MB）
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// URLエンコーディングのデコード関数（`+` はスペースとして扱う）
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (from_hex(bytes[i + 1]), from_hex(bytes[i + 2])) {
                result.push(h * 16 + l);
                i += 3;
                continue;
            }
        } else if bytes[i] == b'+' {
            result.push(b' ');
            i += 1;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).into_owned()
}

/// 16進数文字をバイト値に変換するヘルパー関数
fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// リクエストボディの最大サイズ（バイト）を取得する
/// 優先順位: 環境変数 `ROOST_MAX_BODY_SIZE` -> デフォルト 5MB
pub fn get_max_body_size() -> usize {
    env::var("ROOST_MAX_BODY_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
}

/// 真偽値の環境変数を読む（"1"/"true"/"yes"/"on" と "0"/"false"/"no"/"off"）
pub fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Content-Type の `charset=` パラメータを取り出す
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    let (_, rest) = content_type.rsplit_once("charset=")?;
    let charset = rest.split(';').next().unwrap_or("").trim().trim_matches('"');
    if charset.is_empty() {
        None
    } else {
        Some(charset.to_string())
    }
}

/// テキストを指定の文字コードでエンコード
pub fn encode_text(text: &str, charset: &str) -> Result<Vec<u8>, Error> {
    match charset.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "utf8" | "utf-8" => Ok(text.as_bytes().to_vec()),
        "ascii" | "us-ascii" => {
            if text.is_ascii() {
                Ok(text.as_bytes().to_vec())
            } else {
                Err(Error::Encoding(format!("text cannot be encoded as {}", charset)))
            }
        }
        "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c))
                    .map_err(|_| Error::Encoding(format!("character {:?} cannot be encoded as {}", c, charset)))
            })
            .collect(),
        _ => Err(Error::Encoding(format!("unknown charset: {}", charset))),
    }
}

/// ヘッダー値に使用可能な文字かを判定（CRLF・制御文字を拒否）
pub fn is_header_value_valid(value: &str) -> bool {
    value.chars().all(|c| {
        let code = c as u32;
        code >= 0x20 && code != 0x7F
    })
}

/// Cookie名が安全なトークンか（RFC6265準拠の簡易版）
pub fn is_cookie_name_valid(name: &str) -> bool {
    if name.is_empty() { return false; }
    const FORBIDDEN: &[char] = &['(',')','<','>','@',',',';',':','\\','"','/','[',']','?','{','}','=',' ','\t','\r','\n'];
    name.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && !FORBIDDEN.contains(&c))
}

/// Cookie値が安全か（RFC6265 cookie-octetの簡易版）
/// 許容: 0x21, 0x23-0x2B, 0x2D-0x3A, 0x3C-0x5B, 0x5D-0x7E
pub fn is_cookie_value_valid(value: &str) -> bool {
    value.chars().all(|c| {
        let b = c as u32;
        matches!(b,
            0x21 |
            0x23..=0x2B |
            0x2D..=0x3A |
            0x3C..=0x5B |
            0x5D..=0x7E
        )
    })
}

/// ヘルパー: 無効なCookie名/値ならErrorを返す
pub fn validate_cookie_name_value(name: &str, value: &str) -> Result<(), Error> {
    if !is_cookie_name_valid(name) {
        return Err(Error::InvalidCookie("cookie name contains invalid characters".into()));
    }
    if !is_cookie_value_valid(value) {
        return Err(Error::InvalidCookie("cookie value contains invalid characters".into()));
    }
    Ok(())
}
