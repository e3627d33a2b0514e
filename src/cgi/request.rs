//! CGI環境変数からリクエスト記述子を構築する

use std::env;
use std::io::{self, Read};

use log::{debug, warn};

use crate::common::headers::title_case;
use crate::common::Environ;
use super::validation::{is_valid_header_name, is_valid_header_value};

/// ヘッダー以外で記述子へ引き継ぐCGI変数
const PASSTHROUGH_VARS: [&str; 9] = [
    "SERVER_PROTOCOL",
    "SERVER_NAME",
    "SERVER_PORT",
    "SERVER_SOFTWARE",
    "SCRIPT_NAME",
    "REMOTE_ADDR",
    "REMOTE_PORT",
    "REMOTE_USER",
    "HTTPS",
];

/// CGI変数名をヘッダー名へ変換する
///
/// `HTTP_X_AUTH_TOKEN` → `X-Auth-Token`、`CONTENT_TYPE` → `Content-Type`。
/// ヘッダーに対応しない変数は `None`。
pub fn cgi_header_name(key: &str) -> Option<String> {
    let raw = match key.strip_prefix("HTTP_") {
        Some(rest) => rest,
        None if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" => key,
        None => return None,
    };
    Some(title_case(&raw.replace('_', "-")))
}

/// CGI変数の一覧からHTTPヘッダーを取り出す
///
/// 検証に通らない名前・値の変数は捨てる。
pub(crate) fn headers_from_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut headers: Vec<(String, String)> = vars
        .into_iter()
        .filter_map(|(key, value)| {
            let name = cgi_header_name(&key)?;
            // 名前・値ともにホワイトリスト外なら捨てる
            if !is_valid_header_name(&name) || !is_valid_header_value(&value) {
                warn!("Dropping invalid CGI header variable: {}", key);
                return None;
            }
            Some((name, value))
        })
        .collect();
    headers.sort();
    headers
}

/// 変数一覧と入力ストリームから記述子を作る
///
/// ボディは `CONTENT_LENGTH` バイトまでに制限して遅延で読む。
/// 上限超過の判定はディスパッチャー側でボディ参照時に行う。
pub fn environ_from_vars<I>(vars: I, input: Box<dyn Read + Send>) -> Environ
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let lookup = |name: &str| {
        vars.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let method = lookup("REQUEST_METHOD").unwrap_or_else(|| "GET".to_string());
    let path = lookup("PATH_INFO").unwrap_or_else(|| "/".to_string());
    let query_string = lookup("QUERY_STRING").unwrap_or_default();
    let content_length = lookup("CONTENT_LENGTH").and_then(|v| v.trim().parse::<usize>().ok());

    let mut environ = Environ::new(method, path).with_query_string(query_string);
    for (name, value) in headers_from_vars(vars.iter().cloned()) {
        // Content-Length はボディ側で保持する
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        environ = environ.with_header(name, value);
    }
    for key in PASSTHROUGH_VARS {
        if let Some(value) = lookup(key) {
            environ = environ.with_var(key, value);
        }
    }

    let input: Box<dyn Read + Send> = match content_length {
        Some(0) | None => Box::new(io::empty()),
        Some(len) => Box::new(input.take(len as u64)),
    };
    debug!(
        "Built CGI environ: {} {} (content length {:?})",
        environ.method, environ.path, content_length
    );
    environ.with_input(input, content_length)
}

/// プロセス環境と標準入力から記述子を作る
pub fn environ_from_cgi() -> Environ {
    environ_from_vars(env::vars(), Box::new(io::stdin()))
}
