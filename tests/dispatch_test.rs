//! 公開APIを通したディスパッチの統合テスト

use std::io::Write;
use std::sync::Arc;
use std::thread;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::json;

use roost::{
    abort, finish, with_json_body, Context, Dispatcher, DispatcherConfig, Environ, Error, Output,
    Params,
};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ItemRequest {
    name: String,
    description: Option<String>,
}

fn body_text(dispatcher: &Dispatcher, environ: Environ) -> (u16, String) {
    let res = dispatcher.handle(environ).expect("dispatch failed");
    let status = res.status();
    let body = String::from_utf8(res.into_body_bytes().unwrap()).unwrap();
    (status, body)
}

fn item_app() -> Dispatcher {
    Dispatcher::builder()
        .config(DispatcherConfig::default())
        .get("/items/:id", |_ctx: &mut Context, p: &Params| {
            Ok(json!({ "id": p["id"], "name": "Test Item" }))
        })
        .unwrap()
        .post(
            "/items",
            with_json_body(|ctx: &mut Context, _p: &Params, item: ItemRequest| {
                ctx.response.set_status(201);
                Ok(json!({ "id": "new_item_123", "name": item.name, "description": item.description }))
            }),
        )
        .unwrap()
        .build()
}

#[test]
fn test_app_routing() {
    let app = item_app();

    let (status, body) = body_text(&app, Environ::new("GET", "/items/123"));
    assert_eq!(status, 200);
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["id"], "123");

    let payload = serde_json::to_vec(&ItemRequest {
        name: "New Item".to_string(),
        description: None,
    })
    .unwrap();
    let environ = Environ::new("POST", "/items")
        .with_header("Content-Type", "application/json")
        .with_body(payload);
    let (status, body) = body_text(&app, environ);
    assert_eq!(status, 201);
    assert!(body.contains("\"name\":\"New Item\""));
}

#[test]
fn test_invalid_json_body_is_400() {
    let app = item_app();
    let environ = Environ::new("POST", "/items")
        .with_header("Content-Type", "application/json")
        .with_body(b"{not json".to_vec());
    let (status, body) = body_text(&app, environ);
    assert_eq!(status, 400);
    assert!(body.contains("Error 400: Bad Request"));

    let environ = Environ::new("POST", "/items").with_header("Content-Type", "text/plain");
    assert_eq!(body_text(&app, environ).0, 400);
}

#[test]
fn test_gzip_request_body() {
    let app = Dispatcher::builder()
        .post("/upload", |ctx: &mut Context, _p: &Params| {
            let len = ctx.request.body_bytes()?.len();
            Ok(format!("{} bytes", len))
        })
        .unwrap()
        .build();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&[b'a'; 1000]).unwrap();
    let compressed = encoder.finish().unwrap();

    let environ = Environ::new("POST", "/upload")
        .with_header("Content-Encoding", "gzip")
        .with_body(compressed);
    assert_eq!(body_text(&app, environ), (200, "1000 bytes".to_string()));

    let environ = Environ::new("POST", "/upload")
        .with_header("Content-Encoding", "gzip")
        .with_body(b"definitely not gzip".to_vec());
    assert_eq!(body_text(&app, environ).0, 400);
}

#[test]
fn test_multipart_upload() {
    let app = Dispatcher::builder()
        .post("/files", |ctx: &mut Context, _p: &Params| {
            let title = ctx
                .request
                .form()?
                .get("title")
                .map(|v| v.as_str().to_string())
                .unwrap_or_default();
            let files: Vec<String> = ctx
                .request
                .uploads()?
                .get("doc")
                .map(|list| list.iter().map(|f| format!("{}:{}", f.filename, f.data.len())).collect())
                .unwrap_or_default();
            Ok(json!({ "title": title, "files": files }))
        })
        .unwrap()
        .build();

    let body = concat!(
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
        "report\r\n",
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n",
        "Content-Type: text/plain\r\n\r\n",
        "hello\r\n",
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"doc\"; filename=\"b.txt\"\r\n\r\n",
        "hi\r\n",
        "--XyZ--\r\n",
    );
    let environ = Environ::new("POST", "/files")
        .with_header("Content-Type", "multipart/form-data; boundary=XyZ")
        .with_body(body.as_bytes().to_vec());
    let (status, text) = body_text(&app, environ);
    assert_eq!(status, 200);
    assert_eq!(text, r#"{"files":["a.txt:5","b.txt:2"],"title":"report"}"#);
}

#[test]
fn test_file_output_is_streamed() {
    let path = std::env::temp_dir().join(format!("roost_stream_{}.bin", std::process::id()));
    std::fs::write(&path, vec![7u8; 20_000]).unwrap();

    let file_path = path.clone();
    let app = Dispatcher::builder()
        .get("/download", move |ctx: &mut Context, _p: &Params| {
            ctx.response.set_content_type("application/octet-stream");
            Ok(Output::from(std::fs::File::open(&file_path)?))
        })
        .unwrap()
        .build();

    let res = app.handle(Environ::new("GET", "/download")).unwrap();
    assert_eq!(res.header("Content-Length"), None);
    assert!(res.body.is_stream());
    let chunks: Vec<_> = res.body.collect::<std::io::Result<Vec<_>>>().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 20_000);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_early_finish_and_abort_from_shared_helper() {
    fn require_token(ctx: &Context) -> Option<roost::Outcome> {
        match ctx.request.header("x-token") {
            Some("ok") => None,
            Some(_) => Some(abort(401, "bad token")),
            None => Some(finish("token required")),
        }
    }

    let app = Dispatcher::builder()
        .get("/private", |ctx: &mut Context, _p: &Params| {
            if let Some(outcome) = require_token(ctx) {
                return Ok(outcome);
            }
            Ok(roost::Outcome::Normal(Output::from("welcome")))
        })
        .unwrap()
        .build();

    assert_eq!(
        body_text(&app, Environ::new("GET", "/private").with_header("X-Token", "ok")),
        (200, "welcome".to_string())
    );
    assert_eq!(body_text(&app, Environ::new("GET", "/private").with_header("X-Token", "no")).0, 401);
    assert_eq!(
        body_text(&app, Environ::new("GET", "/private")),
        (200, "token required".to_string())
    );
}

#[test]
fn test_shared_dispatcher_across_threads() {
    let app = Arc::new(
        Dispatcher::builder()
            .get("/square/:n#\\d+#", |ctx: &mut Context, p: &Params| -> Result<String, Error> {
                let n: u64 = p["n"].parse().map_err(Error::handler)?;
                ctx.request.set_local("n", n);
                let seen = ctx.request.local::<u64>("n").copied().unwrap_or_default();
                Ok((seen * seen).to_string())
            })
            .unwrap()
            .config(DispatcherConfig::default().with_optimize(true))
            .build(),
    );

    let workers: Vec<_> = (0..8u64)
        .map(|i| {
            let app = Arc::clone(&app);
            thread::spawn(move || {
                for _ in 0..25 {
                    let (status, body) = body_text(&app, Environ::new("GET", &format!("/square/{}", i)));
                    assert_eq!(status, 200);
                    assert_eq!(body, (i * i).to_string());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // 稼働中にルートを追加できる
    app.route("GET", "/late", |_ctx: &mut Context, _p: &Params| Ok("late")).unwrap();
    assert_eq!(body_text(&app, Environ::new("GET", "/late")), (200, "late".to_string()));
}
