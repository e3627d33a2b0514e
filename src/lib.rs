//! Roost: 同期型の軽量ルートディスパッチャー
//!
//! 1リクエストごとに「束縛 → ルート解決 → ハンドラー実行 → 出力のキャスト → 確定」
//! の順で処理し、ゲートウェイへステータス行・ヘッダー・ボディのチャンク列を返す。
//!
//! ```no_run
//! use roost::{Dispatcher, Environ, Context, Params};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), roost::Error> {
//! let app = Dispatcher::builder()
//!     .get("/users/:id", |_ctx: &mut Context, p: &Params| Ok(json!({ "id": p["id"] })))?
//!     .build();
//!
//! let response = app.handle(Environ::new("GET", "/users/42"))?;
//! assert_eq!(response.status_line, "200 OK");
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod router;
pub mod signal;

#[cfg(feature = "cgi")]
pub mod cgi;

pub use common::{
    reason_phrase, Body, Cookie, Environ, FileUpload, FileWrapper, HeaderList, ParamValue,
    RequestContext, ResponseContext, SameSite,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig, GatewayResponse, ServeSwitch};
pub use error::Error;
pub use handler::{
    error_handler_fn, handler_fn, redirect, redirect_with, with_json_body, Context, ErrorHandler,
    Handler, Output, Params,
};
pub use router::{RouteInfo, Router};
pub use signal::{abort, finish, raise_fatal, FatalSignal, HttpError, IntoOutcome, Outcome};
