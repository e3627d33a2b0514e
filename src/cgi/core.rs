//! CGIメイン実行ロジック

use std::env;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error, info};

use crate::common::Environ;
use crate::dispatcher::{Dispatcher, GatewayResponse};
use crate::dispatcher::core::panic_message;
use crate::error::Error;
use crate::signal::FatalSignal;
use super::error_logging::{gather_failure_context, log_error_to_file};
use super::request::environ_from_cgi;
use super::response::{plain_response, write_response, write_response_to};

/// CGIリクエストを1件処理して標準出力へ書き出す
pub fn run_cgi(dispatcher: &Dispatcher) -> Result<(), Error> {
    let response = serve_environ(dispatcher, environ_from_cgi(), |key| env::var(key).ok())?;
    write_response(response)
}

/// 記述子を処理し、任意のライターへ書き出す
pub fn run_cgi_with<W: Write>(dispatcher: &Dispatcher, environ: Environ, out: &mut W) -> Result<(), Error> {
    let vars: Vec<(String, String)> = [
        "QUERY_STRING",
        "CONTENT_TYPE",
        "CONTENT_LENGTH",
        "HTTP_HOST",
        "HTTP_USER_AGENT",
        "HTTP_AUTHORIZATION",
        "HTTP_COOKIE",
    ]
    .iter()
    .filter_map(|key| environ.var(key).map(|v| (key.to_string(), v)))
    .collect();
    let lookup = move |key: &str| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let response = serve_environ(dispatcher, environ, lookup)?;
    write_response_to(response, out)
}

/// ディスパッチャーが返した失敗を素の応答に変換する
///
/// ディスパッチャーがエラーを返すのはキャッチオール無効時と設定ミスの場合。
/// 致命的な失敗は記録した上で呼び出し元へ返す。
fn serve_environ<F>(dispatcher: &Dispatcher, environ: Environ, lookup: F) -> Result<GatewayResponse, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let method = environ.method.clone();
    let path = environ.path.clone();
    debug!("Processing CGI request: {} {}", method, path);

    let result = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.handle(environ)));
    let context = || gather_failure_context(&method, &path, &lookup);

    match result {
        Ok(Ok(response)) => {
            info!("CGI request completed: {} {} -> {}", method, path, response.status_line);
            Ok(response)
        }
        Ok(Err(err)) if err.is_fatal() => {
            error!("Fatal error while processing {} {}: {}", method, path, err);
            log_error_to_file(&format!("Fatal error: {}\n\n{}", err, context()));
            Err(err)
        }
        Ok(Err(err)) => {
            error!("Error processing request: {:?}", err);
            log_error_to_file(&format!("Unhandled error: {:?}\n\n{}", err, context()));
            let status = err.status_code();
            let message = if status == 500 {
                "Internal Server Error".to_string()
            } else {
                err.to_string()
            };
            Ok(plain_response(status, &message))
        }
        Err(payload) => {
            if let Some(signal) = payload.downcast_ref::<FatalSignal>() {
                error!("Fatal signal while processing {} {}: {}", method, path, signal.0);
                log_error_to_file(&format!("Fatal signal: {}\n\n{}", signal.0, context()));
                return Err(Error::Fatal(signal.0.clone()));
            }
            let message = panic_message(payload.as_ref());
            error!("Handler panicked: {}", message);
            log_error_to_file(&format!("Handler panicked: {}\n\n{}", message, context()));
            Ok(plain_response(500, "Internal Server Error"))
        }
    }
}
