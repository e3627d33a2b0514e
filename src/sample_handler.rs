//! サンプルアプリケーションの実装
//!
//! CGIバイナリの動作確認用の小さなルート群。

use std::collections::HashMap;

use log::info;
use serde::Deserialize;
use serde_json::{json, Value};

use roost::error::Error;
use roost::handler::{redirect, with_json_body, Context, Params};
use roost::signal::{abort, Outcome};
use roost::{Dispatcher, DispatcherConfig, HttpError};

#[derive(Debug, Deserialize)]
struct Greeting {
    name: String,
    #[serde(default)]
    excited: bool,
}

fn hello(_ctx: &mut Context, _params: &Params) -> Result<Value, Error> {
    info!("Handling Hello request");
    Ok(json!({
        "message": "Hello from Roost CGI",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// リクエスト情報をエコーする
fn echo(ctx: &mut Context, _params: &Params) -> Result<Value, Error> {
    let query: HashMap<String, Vec<String>> = ctx
        .request
        .query()
        .iter()
        .map(|(k, v)| (k.clone(), v.values().into_iter().map(str::to_string).collect()))
        .collect();
    let method = ctx.request.method().to_string();
    let path = ctx.request.path().to_string();
    let body = String::from_utf8_lossy(ctx.request.body_bytes()?).into_owned();

    Ok(json!({
        "method": method,
        "path": path,
        "query": query,
        "body": body,
    }))
}

fn user(_ctx: &mut Context, params: &Params) -> Result<Value, Error> {
    Ok(json!({ "id": params["id"] }))
}

fn greet(_ctx: &mut Context, _params: &Params, greeting: Greeting) -> Result<String, Error> {
    let mark = if greeting.excited { "!" } else { "." };
    Ok(format!("Hello, {}{}", greeting.name, mark))
}

/// フォームの値をクッキーに保存する
fn remember(ctx: &mut Context, _params: &Params) -> Result<Outcome, Error> {
    let name = ctx
        .request
        .form()?
        .get("name")
        .map(|v| v.as_str().to_string())
        .ok_or_else(|| HttpError::new(400, "Missing form field: name"))?;
    ctx.response.set_cookie_value("name", &name)?;
    redirect(ctx, "/whoami")
}

fn whoami(ctx: &mut Context, _params: &Params) -> Result<String, Error> {
    Ok(match ctx.request.cookie("name") {
        Some(name) => format!("You are {}", name),
        None => "Nobody remembered yet".to_string(),
    })
}

/// サンプルのディスパッチャーを組み立てる
pub fn build_app(config: DispatcherConfig) -> Result<Dispatcher, Error> {
    let app = Dispatcher::builder()
        .config(config)
        .get("/", hello)?
        .get("/echo", echo)?
        .post("/echo", echo)?
        .get("/users/:id#\\d+#", user)?
        .post("/greet", with_json_body(greet))?
        .post("/remember", remember)?
        .get("/whoami", whoami)?
        .get("/old", |ctx: &mut Context, _p: &Params| redirect(ctx, "/"))?
        .get("/forbidden", |_ctx: &mut Context, _p: &Params| Ok(abort(403, "Access denied")))?
        .get("/panic", |_ctx: &mut Context, _p: &Params| -> Result<String, Error> {
            info!("Handling Panic request - this will panic!");
            panic!("Test panic from handler");
        })?
        .error_handler(404, |_ctx: &mut Context, err: &HttpError| {
            Ok(json!({ "error": err.message(), "status": err.status() }))
        })
        .build();
    Ok(app)
}
