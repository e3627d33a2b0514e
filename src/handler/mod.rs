//! リクエストハンドラーとハンドラーに渡されるコンテキスト

pub mod output;

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::common::{RequestContext, ResponseContext};
use crate::error::Error;
use crate::signal::{HttpError, IntoOutcome, Outcome};

pub use output::Output;

/// URLパターンから抽出された名前付きパラメータ
pub type Params = HashMap<String, String>;

/// リクエスト単位のコンテキスト
pub struct Context {
    pub request: RequestContext,
    pub response: ResponseContext,
}

impl Context {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            response: ResponseContext::new(),
        }
    }
}

/// リクエストハンドラー
pub trait Handler: Send + Sync {
    fn call(&self, ctx: &mut Context, params: &Params) -> Result<Outcome, Error>;
}

/// 関数・クロージャをハンドラーとして扱うアダプタ
pub struct FnHandler<F, R> {
    func: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> Handler for FnHandler<F, R>
where
    F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync,
    R: IntoOutcome,
{
    fn call(&self, ctx: &mut Context, params: &Params) -> Result<Outcome, Error> {
        (self.func)(ctx, params).map(IntoOutcome::into_outcome)
    }
}

/// 関数からハンドラーを作成
pub fn handler_fn<F, R>(func: F) -> FnHandler<F, R>
where
    F: Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync,
    R: IntoOutcome,
{
    FnHandler {
        func,
        _output: PhantomData,
    }
}

/// ステータスコードごとのエラーハンドラー
pub trait ErrorHandler: Send + Sync {
    fn call(&self, ctx: &mut Context, error: &HttpError) -> Result<Outcome, Error>;
}

/// 関数・クロージャをエラーハンドラーとして扱うアダプタ
pub struct FnErrorHandler<F, R> {
    func: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> ErrorHandler for FnErrorHandler<F, R>
where
    F: Fn(&mut Context, &HttpError) -> Result<R, Error> + Send + Sync,
    R: IntoOutcome,
{
    fn call(&self, ctx: &mut Context, error: &HttpError) -> Result<Outcome, Error> {
        (self.func)(ctx, error).map(IntoOutcome::into_outcome)
    }
}

/// 関数からエラーハンドラーを作成
pub fn error_handler_fn<F, R>(func: F) -> FnErrorHandler<F, R>
where
    F: Fn(&mut Context, &HttpError) -> Result<R, Error> + Send + Sync,
    R: IntoOutcome,
{
    FnErrorHandler {
        func,
        _output: PhantomData,
    }
}

/// JSONボディを必須とするハンドラーへの薄いアダプタ
///
/// ボディが無い・壊れている場合は `InvalidRequestBody`（400）になる。
pub fn with_json_body<F, T, R>(func: F) -> impl Fn(&mut Context, &Params) -> Result<R, Error> + Send + Sync
where
    F: Fn(&mut Context, &Params, T) -> Result<R, Error> + Send + Sync,
    T: DeserializeOwned,
{
    move |ctx: &mut Context, params: &Params| {
        let body = ctx.request.json::<T>()?;
        func(ctx, params, body)
    }
}

/// 307で別URLへリダイレクトする
pub fn redirect(ctx: &mut Context, url: &str) -> Result<Outcome, Error> {
    redirect_with(ctx, url, 307)
}

/// 指定ステータスで別URLへリダイレクトする
pub fn redirect_with(ctx: &mut Context, url: &str, status: u16) -> Result<Outcome, Error> {
    ctx.response.set_header("Location", url)?;
    ctx.response.set_status(status);
    Ok(Outcome::Finish(Output::Empty))
}
