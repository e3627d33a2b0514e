//! 失敗の記録と機密値のマスク

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::{Local, Utc};
use log::warn;

/// 失敗の記録先（カレントディレクトリ）
pub const ERROR_LOG_FILE: &str = "roost_error.log";

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// 記録する基本的なCGI変数
const CONTEXT_VARS: [&str; 8] = [
    "QUERY_STRING",
    "CONTENT_TYPE",
    "CONTENT_LENGTH",
    "SERVER_PROTOCOL",
    "SERVER_NAME",
    "SERVER_PORT",
    "REMOTE_ADDR",
    "REMOTE_PORT",
];

/// 記録する代表的なHTTPヘッダー（存在するもののみ）
const CONTEXT_HEADERS: [&str; 9] = [
    "HTTP_HOST",
    "HTTP_USER_AGENT",
    "HTTP_ACCEPT",
    "HTTP_ACCEPT_ENCODING",
    "HTTP_X_FORWARDED_FOR",
    "HTTP_X_FORWARDED_PROTO",
    "HTTP_X_REQUEST_ID",
    "HTTP_AUTHORIZATION",
    "HTTP_COOKIE",
];

/// エラー内容を [`ERROR_LOG_FILE`] に追記する
///
/// 書き込めなかった場合は標準エラーのログにだけ残す。
pub fn log_error_to_file(message: &str) {
    if let Err(e) = append_error_log(Path::new(ERROR_LOG_FILE), message) {
        warn!("Failed to write {}: {}", ERROR_LOG_FILE, e);
    }
}

/// 指定ファイルへ1件分の記録を追記する
pub fn append_error_log(path: &Path, message: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", RULE)?;
    writeln!(file, "ROOST CGI ERROR")?;
    writeln!(file, "Timestamp (UTC): {}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC"))?;
    writeln!(file, "Timestamp (Local): {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %Z"))?;
    writeln!(file, "Process ID: {}", std::process::id())?;
    writeln!(file, "{}", THIN_RULE)?;
    writeln!(file, "{}", message)?;
    writeln!(file, "{}", RULE)?;
    writeln!(file)
}

/// 失敗時に記録するリクエスト環境の要約（機密値はマスク）
///
/// `lookup` はCGI変数名から値を引く。
pub fn gather_failure_context<F>(method: &str, path: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut lines = vec![
        "CGI request context:".to_string(),
        format!("  REQUEST_METHOD={}", method),
        format!("  PATH_INFO={}", path),
    ];

    for key in CONTEXT_VARS {
        if let Some(val) = lookup(key) {
            lines.push(format!("  {}={}", key, redact_value_for_log(key, &val)));
        }
    }

    lines.push("  HTTP headers:".to_string());
    let before = lines.len();
    for key in CONTEXT_HEADERS {
        if let Some(val) = lookup(key) {
            lines.push(format!("    {}={}", key, redact_value_for_log(key, &val)));
        }
    }
    if lines.len() == before {
        lines.push("    (none)".to_string());
    }

    lines.join("\n")
}

/// ログに残す値を整形する（機密キーはマスク、長すぎる値は切り詰め）
pub fn redact_value_for_log(key: &str, value: &str) -> String {
    let key_l = key.to_ascii_lowercase();
    if key_l == "query_string" {
        return redact_query_string(value);
    }
    if is_sensitive_key_like(&key_l) {
        return "***redacted***".to_string();
    }
    if value.len() > 200 {
        let mut end = 200;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated]", &value[..end])
    } else {
        value.to_string()
    }
}

/// 小文字のキーが機密情報らしいか
pub fn is_sensitive_key_like(lower_key: &str) -> bool {
    const PATTERNS: [&str; 16] = [
        "authorization",
        "cookie",
        "token",
        "secret",
        "password",
        "pass",
        "api-key",
        "api_key",
        "apikey",
        "jwt",
        "auth",
        "session",
        "csrf",
        "signature",
        "private",
        "credential",
    ];
    PATTERNS.iter().any(|p| lower_key.contains(p)) || lower_key.ends_with("key")
}

/// クエリ文字列の機密パラメータの値をマスクする
pub fn redact_query_string(qs: &str) -> String {
    qs.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            if is_sensitive_key_like(&k.to_ascii_lowercase()) {
                format!("{}=***redacted***", k)
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
