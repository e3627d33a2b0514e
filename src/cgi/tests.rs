//! CGIモジュールのテスト

use std::io::{Cursor, Read};

use bytes::Bytes;
use serde_json::json;

use crate::common::{Body, Environ};
use crate::dispatcher::{Dispatcher, DispatcherConfig, GatewayResponse};
use crate::error::Error;
use crate::handler::{Context, Params};
use crate::signal::raise_fatal;
use super::core::run_cgi_with;
use super::error_logging::{
    append_error_log, gather_failure_context, is_sensitive_key_like, redact_query_string,
    redact_value_for_log,
};
use super::request::{cgi_header_name, environ_from_vars, headers_from_vars};
use super::response::{plain_response, write_response_to};
use super::validation::{is_valid_header_name, is_valid_header_value};

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn app(catchall: bool) -> Dispatcher {
    Dispatcher::builder()
        .config(DispatcherConfig::default().with_catchall(catchall))
        .get("/", |_ctx: &mut Context, _p: &Params| Ok(json!({"message": "hello"})))
        .unwrap()
        .post("/echo", |ctx: &mut Context, _p: &Params| {
            let body = ctx.request.body_bytes()?.clone();
            Ok(body)
        })
        .unwrap()
        .get("/fail", |_ctx: &mut Context, _p: &Params| -> Result<String, Error> {
            Err(Error::msg("boom"))
        })
        .unwrap()
        .get("/panic", |_ctx: &mut Context, _p: &Params| -> Result<String, Error> {
            panic!("handler blew up")
        })
        .unwrap()
        .get("/fatal", |_ctx: &mut Context, _p: &Params| -> Result<String, Error> {
            raise_fatal("shutdown requested")
        })
        .unwrap()
        .build()
}

fn run(dispatcher: &Dispatcher, environ: Environ) -> Result<String, Error> {
    let mut out = Vec::new();
    run_cgi_with(dispatcher, environ, &mut out)?;
    Ok(String::from_utf8(out).expect("utf8"))
}

#[test]
fn test_cgi_header_name() {
    assert_eq!(cgi_header_name("HTTP_X_AUTH_TOKEN").as_deref(), Some("X-Auth-Token"));
    assert_eq!(cgi_header_name("HTTP_HOST").as_deref(), Some("Host"));
    assert_eq!(cgi_header_name("CONTENT_TYPE").as_deref(), Some("Content-Type"));
    assert_eq!(cgi_header_name("CONTENT_LENGTH").as_deref(), Some("Content-Length"));
    assert_eq!(cgi_header_name("REMOTE_ADDR"), None);
}

#[test]
fn test_headers_from_vars() {
    let headers = headers_from_vars(vars(&[
        ("HTTP_X_CUSTOM_HEADER", "test value"),
        ("HTTP_X_AUTH_TOKEN", "secret-token"),
        ("HTTP_X_EVIL", "a\r\nSet-Cookie: x=1"),
        ("CONTENT_LENGTH", "123"),
        ("UNRELATED_VAR", "should not be included"),
    ]));
    let get = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    assert_eq!(get("X-Custom-Header"), Some("test value"));
    assert_eq!(get("X-Auth-Token"), Some("secret-token"));
    assert_eq!(get("Content-Length"), Some("123"));
    assert_eq!(get("X-Evil"), None);
    assert_eq!(get("UNRELATED_VAR"), None);
    assert_eq!(headers.len(), 3);

    // 名前順に並ぶ
    let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, vec!["Content-Length", "X-Auth-Token", "X-Custom-Header"]);
}

#[test]
fn test_environ_from_vars() {
    let input = Box::new(Cursor::new(b"hello world, and more".to_vec()));
    let mut environ = environ_from_vars(
        vars(&[
            ("REQUEST_METHOD", "POST"),
            ("PATH_INFO", "/echo"),
            ("QUERY_STRING", "a=1"),
            ("CONTENT_TYPE", "text/plain"),
            ("CONTENT_LENGTH", "11"),
            ("HTTP_USER_AGENT", "TestAgent/1.0"),
            ("REMOTE_ADDR", "10.0.0.1"),
        ]),
        input,
    );

    assert_eq!(environ.method, "POST");
    assert_eq!(environ.path, "/echo");
    assert_eq!(environ.query_string, "a=1");
    assert_eq!(environ.content_length, Some(11));
    assert_eq!(environ.header("content-type"), Some("text/plain"));
    assert_eq!(environ.header("User-Agent"), Some("TestAgent/1.0"));
    assert_eq!(environ.header("Content-Length"), None);
    assert_eq!(environ.var("REMOTE_ADDR").as_deref(), Some("10.0.0.1"));

    // CONTENT_LENGTH を超えては読まない
    let mut body = String::new();
    environ.take_input().read_to_string(&mut body).unwrap();
    assert_eq!(body, "hello world");
}

#[test]
fn test_environ_from_vars_defaults() {
    let environ = environ_from_vars(Vec::new(), Box::new(Cursor::new(b"ignored".to_vec())));
    assert_eq!(environ.method, "GET");
    assert_eq!(environ.path, "/");
    assert_eq!(environ.content_length, None);
}

#[test]
fn test_run_cgi_writes_status_and_body() {
    let out = run(&app(true), Environ::new("GET", "/")).unwrap();
    assert!(out.starts_with("Status: 200 OK\r\n"));
    assert!(out.contains("Content-Type: application/json\r\n"));
    assert!(out.contains("Content-Length: 19\r\n"));
    assert!(out.ends_with("\r\n\r\n{\"message\":\"hello\"}"));
}

#[test]
fn test_run_cgi_echoes_body() {
    let environ = environ_from_vars(
        vars(&[("REQUEST_METHOD", "POST"), ("PATH_INFO", "/echo"), ("CONTENT_LENGTH", "4")]),
        Box::new(Cursor::new(b"pingpong".to_vec())),
    );
    let out = run(&app(true), environ).unwrap();
    assert!(out.starts_with("Status: 200 OK\r\n"));
    assert!(out.ends_with("\r\n\r\nping"));
}

#[test]
fn test_run_cgi_not_found() {
    let out = run(&app(true), Environ::new("GET", "/nowhere")).unwrap();
    assert!(out.starts_with("Status: 404 Not Found\r\n"));
    assert!(out.contains("Error 404: Not Found"));
}

#[test]
fn test_run_cgi_catchall_page() {
    let environ = Environ::new("GET", "/fail").with_errors(Box::new(std::io::sink()));
    let out = run(&app(true), environ).unwrap();
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(out.contains("Unhandled Exception"));
}

#[test]
fn test_run_cgi_strict_mode_answers_plain_500() {
    let out = run(&app(false), Environ::new("GET", "/fail")).unwrap();
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(out.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(out.ends_with("\r\n\r\nInternal Server Error"));
    assert!(!out.contains("boom"));

    let out = run(&app(false), Environ::new("GET", "/panic")).unwrap();
    assert!(out.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(!out.contains("handler blew up"));
}

#[test]
fn test_run_cgi_fatal_propagates() {
    let err = run(&app(true), Environ::new("GET", "/fatal")).unwrap_err();
    assert!(matches!(err, Error::Fatal(ref reason) if reason == "shutdown requested"));
}

#[test]
fn test_write_response_streams_chunks() {
    let response = GatewayResponse {
        status_line: "200 OK".to_string(),
        headers: vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Set-Cookie".to_string(), "a=1; Path=/".to_string()),
            ("Set-Cookie".to_string(), "b=2; Expires=Tue, 31 Dec 2024 23:59:59 GMT".to_string()),
        ],
        body: Body::from_chunks(vec![Bytes::from_static(b"he"), Bytes::from_static(b"llo")]),
    };

    let mut buf: Vec<u8> = Vec::new();
    write_response_to(response, &mut buf).expect("write_response_to failed");
    let out = String::from_utf8(buf).expect("utf8");

    assert!(out.starts_with("Status: 200 OK\r\n"));
    let set_cookie_lines: Vec<&str> = out.lines().filter(|l| l.starts_with("Set-Cookie:")).collect();
    assert_eq!(set_cookie_lines.len(), 2);
    assert!(out.contains("Set-Cookie: b=2; Expires=Tue, 31 Dec 2024 23:59:59 GMT\r\n"));
    assert!(out.ends_with("\r\n\r\nhello"));
}

#[test]
fn test_write_response_rejects_header_injection() {
    let response = GatewayResponse {
        status_line: "200 OK".to_string(),
        headers: vec![("X-Evil".to_string(), "ok\r\nSet-Cookie: stolen=1".to_string())],
        body: Body::from_chunks(vec![Bytes::from_static(b"secret")]),
    };

    let mut buf: Vec<u8> = Vec::new();
    write_response_to(response, &mut buf).unwrap();
    let out = String::from_utf8(buf).unwrap();

    assert!(out.starts_with("Status: 400 Bad Request\r\n"));
    assert!(!out.contains("stolen"));
    assert!(!out.contains("secret"));
    assert!(out.ends_with("Bad Request: Invalid header"));
}

#[test]
fn test_write_response_skips_reserved_status_header() {
    let response = GatewayResponse {
        status_line: "201 Created".to_string(),
        headers: vec![("Status".to_string(), "200 OK".to_string())],
        body: Body::empty(),
    };
    let mut buf: Vec<u8> = Vec::new();
    write_response_to(response, &mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "Status: 201 Created\r\n\r\n");
}

#[test]
fn test_plain_response() {
    let res = plain_response(413, "too big");
    assert_eq!(res.status_line, "413 Payload Too Large");
    assert_eq!(res.header("Content-Length"), Some("7"));
    assert_eq!(res.into_body_bytes().unwrap(), b"too big");

    assert_eq!(plain_response(799, "").status_line, "799 Unknown");
}

#[test]
fn test_is_valid_header_name() {
    assert!(is_valid_header_name("Content-Type"));
    assert!(is_valid_header_name("X-Custom-Header"));

    assert!(!is_valid_header_name(""));
    assert!(!is_valid_header_name("Content\rType"));
    assert!(!is_valid_header_name("Content Type"));
    assert!(!is_valid_header_name("Content:Type"));
}

#[test]
fn test_is_valid_header_value() {
    assert!(is_valid_header_value("application/json; charset=utf-8"));
    assert!(is_valid_header_value(""));
    assert!(is_valid_header_value("value\twith\ttab"));

    assert!(!is_valid_header_value("text/html\r\nSet-Cookie: malicious"));
    assert!(!is_valid_header_value("text/html\nX-Evil: attack"));
    assert!(!is_valid_header_value("value\x00with\x01control"));
}

#[test]
fn test_redact_value_for_log() {
    assert_eq!(redact_value_for_log("CONTENT_TYPE", "application/json"), "application/json");
    assert_eq!(redact_value_for_log("HTTP_AUTHORIZATION", "Bearer token123"), "***redacted***");
    assert_eq!(redact_value_for_log("HTTP_COOKIE", "session=abc123"), "***redacted***");
    assert_eq!(redact_value_for_log("HTTP_X_API_KEY", "secret-key"), "***redacted***");
    assert_eq!(
        redact_value_for_log("QUERY_STRING", "name=john&token=secret123"),
        "name=john&token=***redacted***"
    );

    let long_value = "a".repeat(250);
    let result = redact_value_for_log("HTTP_USER_AGENT", &long_value);
    assert_eq!(result.len(), 200 + "...[truncated]".len());

    // 文字境界で切り詰める
    let wide = "あ".repeat(100);
    assert!(redact_value_for_log("HTTP_USER_AGENT", &wide).ends_with("...[truncated]"));
}

#[test]
fn test_is_sensitive_key_like() {
    for key in ["http_authorization", "cookie", "access_token", "password", "x-api-key", "jwt", "csrf"] {
        assert!(is_sensitive_key_like(key), "{}", key);
    }
    for key in ["content_type", "host", "user_agent", "accept", "content_length"] {
        assert!(!is_sensitive_key_like(key), "{}", key);
    }
}

#[test]
fn test_redact_query_string() {
    assert_eq!(redact_query_string(""), "");
    assert_eq!(redact_query_string("name=john&age=30"), "name=john&age=30");
    assert_eq!(
        redact_query_string("token=abc&password=123&name=john"),
        "token=***redacted***&password=***redacted***&name=john"
    );
    assert_eq!(redact_query_string("token=&flag"), "token=***redacted***&flag=");
}

#[test]
fn test_gather_failure_context() {
    let env = vars(&[
        ("QUERY_STRING", "name=test&token=secret"),
        ("CONTENT_TYPE", "application/json"),
        ("HTTP_HOST", "example.com"),
        ("HTTP_AUTHORIZATION", "Bearer secret-token"),
        ("HTTP_COOKIE", "session=abc123"),
    ]);
    let lookup = |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let context = gather_failure_context("POST", "/api/test", lookup);

    assert!(context.contains("REQUEST_METHOD=POST"));
    assert!(context.contains("PATH_INFO=/api/test"));
    assert!(context.contains("QUERY_STRING=name=test&token=***redacted***"));
    assert!(context.contains("HTTP_HOST=example.com"));
    assert!(context.contains("HTTP_AUTHORIZATION=***redacted***"));
    assert!(context.contains("HTTP_COOKIE=***redacted***"));
    assert!(!context.contains("secret-token"));

    let empty = gather_failure_context("GET", "/", |_: &str| None);
    assert!(empty.contains("HTTP headers:\n    (none)"));
}

#[test]
fn test_append_error_log() {
    let path = std::env::temp_dir().join(format!("roost_error_test_{}.log", std::process::id()));
    let _ = std::fs::remove_file(&path);

    append_error_log(&path, "first failure").unwrap();
    append_error_log(&path, "second failure").unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.matches("ROOST CGI ERROR").count(), 2);
    assert!(content.contains("Timestamp (UTC):"));
    assert!(content.contains("Process ID:"));
    assert!(content.contains("first failure"));
    assert!(content.contains("second failure"));

    let _ = std::fs::remove_file(&path);
}
