use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Write};
use std::panic;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::common::{reason_phrase, Body, Environ, RequestContext};
use crate::error::Error;
use crate::handler::{error_handler_fn, handler_fn, Context, ErrorHandler, Handler, Output, Params};
use crate::router::{RouteInfo, RouteMatch, Router};
use crate::signal::{FatalSignal, HttpError, IntoOutcome, Outcome};

use super::cast::{cast, raw_body, CastEnv};
use super::config::DispatcherConfig;
use super::trace::{catch_unwind_traced, error_chain, format_traceback};
use super::{GatewayResponse, ServeSwitch};

/// 本文を持たないステータス
const BODYLESS_STATUSES: [u16; 4] = [100, 101, 204, 304];

type ErrorHandlers = HashMap<u16, Arc<dyn ErrorHandler>>;

/// ディスパッチャー
///
/// ルートテーブルは読み書きロックの中にあり、複数スレッドから `handle` を呼べる。
/// リクエストごとの状態は呼び出しごとの `Context` にだけ存在する。
pub struct Dispatcher {
    router: RwLock<Router>,
    error_handlers: RwLock<ErrorHandlers>,
    config: DispatcherConfig,
    switch: ServeSwitch,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::from_parts(Router::new(), HashMap::new(), config)
    }

    /// ビルダーを作成
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    fn from_parts(router: Router, error_handlers: ErrorHandlers, config: DispatcherConfig) -> Self {
        Self {
            router: RwLock::new(router),
            error_handlers: RwLock::new(error_handlers),
            config,
            switch: ServeSwitch::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 配信中でもルートを追加できる（書き込みロックを取る）
    pub fn add_route<H>(&self, pattern: &str, handler: H, method: &str) -> Result<(), Error>
    where
        H: Handler + 'static,
    {
        self.write_router().add_route(pattern, handler, method)
    }

    /// 関数ハンドラーを登録
    pub fn route<F, R>(&self, method: &str, pattern: &str, func: F) -> Result<(), Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.add_route(pattern, handler_fn(func), method)
    }

    pub fn add_static_route<H>(&self, path: &str, handler: H, method: &str)
    where
        H: Handler + 'static,
    {
        self.write_router().add_static_route(path, handler, method);
    }

    pub fn set_default<H>(&self, handler: H)
    where
        H: Handler + 'static,
    {
        self.write_router().set_default(handler);
    }

    /// ステータスコードごとのエラーハンドラーを登録
    pub fn set_error_handler<F, R>(&self, status: u16, func: F)
    where
        F: Fn(&mut Context, &HttpError) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        debug!("Registering error handler for status {}", status);
        self.error_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status, Arc::new(error_handler_fn(func)));
    }

    /// 配信の停止・再開スイッチ
    pub fn serve_switch(&self) -> ServeSwitch {
        self.switch.clone()
    }

    pub fn stop(&self) {
        self.switch.stop();
    }

    pub fn resume(&self) {
        self.switch.resume();
    }

    pub fn is_serving(&self) -> bool {
        self.switch.is_serving()
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.read_router().routes()
    }

    fn read_router(&self) -> std::sync::RwLockReadGuard<'_, Router> {
        self.router.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_router(&self) -> std::sync::RwLockWriteGuard<'_, Router> {
        self.router.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 1リクエストを処理してゲートウェイ向けのレスポンスを返す
    ///
    /// キャッチオール有効時は未処理の失敗を500ページに変換する。無効時はエラーを
    /// `Err` として返し、パニックは再送出する。致命的シグナルは常に伝播する。
    /// 理由句の無いステータスは設定ミスとして `UnknownStatus` を返す。
    pub fn handle(&self, environ: Environ) -> Result<GatewayResponse, Error> {
        let mut ctx = Context::new(RequestContext::bind(environ, self.config.max_body_size));

        let outcome = catch_unwind_traced(|| self.process(&mut ctx));
        let body = match outcome {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                if err.is_fatal() || !self.config.catchall {
                    return Err(err);
                }
                let traceback = format_traceback(&error_chain(&err), err.trace());
                self.unhandled(&mut ctx, &format!("{:?}", err), traceback)
            }
            Err((payload, trace)) => {
                if payload.is::<FatalSignal>() || !self.config.catchall {
                    panic::resume_unwind(payload);
                }
                let description = format!("panic({:?})", panic_message(payload.as_ref()));
                self.unhandled(&mut ctx, &description, format_traceback("", trace.as_ref()))
            }
        };

        self.finalize(ctx, body)
    }

    fn process(&self, ctx: &mut Context) -> Result<Body, Error> {
        let outcome = if !self.switch.is_serving() {
            Outcome::Abort(HttpError::new(503, "Server stopped"))
        } else {
            match self.lookup(ctx.request.path(), ctx.request.method()) {
                Some(found) => {
                    debug!("Invoking handler for {} {}", ctx.request.method(), ctx.request.path());
                    match found.handler.call(ctx, &found.params) {
                        Ok(outcome) => outcome,
                        Err(err) => match err.as_abort() {
                            Some(abort) => {
                                debug!("Handler error treated as abort: {}", err);
                                Outcome::Abort(abort)
                            }
                            None => return Err(err),
                        },
                    }
                }
                None => Outcome::Abort(HttpError::new(404, "Not found")),
            }
        };

        match outcome {
            Outcome::Normal(output) => self.cast(output, ctx),
            Outcome::Finish(output) => {
                debug!("Handler finished early for {}", ctx.request.path());
                raw_body(output, &ctx.response, &self.cast_env(ctx))
            }
            Outcome::Abort(abort) => self.abort(abort, ctx),
        }
    }

    fn lookup(&self, path: &str, method: &str) -> Option<RouteMatch> {
        let found = self.read_router().resolve(path, method)?;
        if self.config.optimize {
            if let Some(position) = &found.position {
                // 競合時は並び替えを見送る
                if let Ok(mut router) = self.router.try_write() {
                    router.promote(position);
                }
            }
        }
        Some(found)
    }

    fn abort(&self, abort: HttpError, ctx: &mut Context) -> Result<Body, Error> {
        let abort = abort.with_url(ctx.request.path());
        info!(
            "Aborting {} {} with {}",
            ctx.request.method(),
            ctx.request.path(),
            abort.status()
        );
        ctx.response.set_status(abort.status());

        let handler = self
            .error_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&abort.status())
            .cloned();
        let Some(handler) = handler else {
            return self.cast(Output::Text(abort.render()), ctx);
        };

        match handler.call(ctx, &abort)? {
            Outcome::Normal(output) => self.cast(output, ctx),
            Outcome::Finish(output) => raw_body(output, &ctx.response, &self.cast_env(ctx)),
            Outcome::Abort(nested) => {
                let nested = nested.with_url(ctx.request.path());
                ctx.response.set_status(nested.status());
                self.cast(Output::Text(nested.render()), ctx)
            }
        }
    }

    fn cast(&self, output: Output, ctx: &mut Context) -> Result<Body, Error> {
        let file_wrapper = ctx.request.environ().file_wrapper().cloned();
        let env = CastEnv {
            autojson: self.config.autojson,
            route: ctx.request.path(),
            file_wrapper: file_wrapper.as_ref(),
        };
        cast(output, &mut ctx.response, &env)
    }

    fn cast_env<'a>(&self, ctx: &'a Context) -> CastEnv<'a> {
        CastEnv {
            autojson: self.config.autojson,
            route: ctx.request.path(),
            file_wrapper: ctx.request.environ().file_wrapper(),
        }
    }

    /// 未処理の失敗を500のエラーページにする
    fn unhandled(&self, ctx: &mut Context, description: &str, traceback: String) -> Body {
        error!(
            "Unhandled failure while serving {} {}: {}",
            ctx.request.method(),
            ctx.request.path(),
            description
        );

        let message = format!("Unhandled Exception: {}\n", description);
        let page = HttpError::new(500, message.clone())
            .with_url(ctx.request.path())
            .with_traceback(traceback.clone())
            .render();

        if let Err(e) = write_report(ctx.request.environ_mut().errors(), &message, &traceback) {
            warn!("Failed to write to the error stream: {}", e);
        }

        ctx.response.set_status(500);
        ctx.response.headers_mut().remove("Content-Length");
        ctx.response.set_content_type("text/html");
        Body::from_chunks(vec![Bytes::from(page)])
    }

    fn finalize(&self, ctx: Context, body: Body) -> Result<GatewayResponse, Error> {
        let status = ctx.response.status();
        let reason = reason_phrase(status).ok_or_else(|| {
            error!("Response status {} has no reason phrase", status);
            Error::UnknownStatus(status)
        })?;

        // 本文を持たないステータスとHEADは空にする
        let body = if BODYLESS_STATUSES.contains(&status) || ctx.request.method() == "HEAD" {
            Body::empty()
        } else {
            body
        };

        debug!("Finalized {} {} -> {}", ctx.request.method(), ctx.request.path(), status);
        Ok(GatewayResponse {
            status_line: format!("{} {}", status, reason),
            headers: ctx.response.wire_headers(),
            body,
        })
    }
}

/// ディスパッチャーのビルダー
#[derive(Default)]
pub struct DispatcherBuilder {
    router: Router,
    error_handlers: ErrorHandlers,
    config: Option<DispatcherConfig>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定を指定（省略時は環境変数から読み込む）
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn add_route<H>(mut self, pattern: &str, handler: H, method: &str) -> Result<Self, Error>
    where
        H: Handler + 'static,
    {
        self.router.add_route(pattern, handler, method)?;
        Ok(self)
    }

    pub fn route<F, R>(mut self, method: &str, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.router.route(method, pattern, func)?;
        Ok(self)
    }

    pub fn get<F, R>(self, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("GET", pattern, func)
    }

    pub fn post<F, R>(self, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("POST", pattern, func)
    }

    pub fn put<F, R>(self, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("PUT", pattern, func)
    }

    pub fn delete<F, R>(self, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("DELETE", pattern, func)
    }

    pub fn patch<F, R>(self, pattern: &str, func: F) -> Result<Self, Error>
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.route("PATCH", pattern, func)
    }

    pub fn static_route<H>(mut self, path: &str, handler: H, method: &str) -> Self
    where
        H: Handler + 'static,
    {
        self.router.add_static_route(path, handler, method);
        self
    }

    /// どのルートにも一致しない場合のハンドラー
    pub fn default_route<F, R>(mut self, func: F) -> Self
    where
        F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.router.set_default(handler_fn(func));
        self
    }

    pub fn error_handler<F, R>(mut self, status: u16, func: F) -> Self
    where
        F: Fn(&mut Context, &HttpError) -> Result<R, Error> + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        self.error_handlers
            .insert(status, Arc::new(error_handler_fn(func)));
        self
    }

    pub fn build(self) -> Dispatcher {
        let config = self.config.unwrap_or_else(DispatcherConfig::from_env);
        info!(
            "Dispatcher ready with {} routes (catchall={}, autojson={}, optimize={})",
            self.router.route_count(),
            config.catchall,
            config.autojson,
            config.optimize
        );
        Dispatcher::from_parts(self.router, self.error_handlers, config)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn write_report(errors: &mut dyn Write, message: &str, traceback: &str) -> io::Result<()> {
    errors.write_all(message.as_bytes())?;
    errors.write_all(b"Traceback:\n")?;
    errors.write_all(traceback.as_bytes())?;
    errors.flush()
}
