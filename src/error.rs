//! エラー型の定義

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::signal::HttpError;

/// アプリケーションのエラー型
#[derive(Error, Debug)]
pub enum Error {
    /// ルートパターンのコンパイルエラー
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    /// 無効なリクエストボディ
    #[error("Invalid request body: {0}")]
    InvalidRequestBody(String),

    /// リクエストボディが上限を超過
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// 無効なヘッダー
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// 無効なクッキー
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    /// ハンドラーから送出されたHTTPエラー
    #[error("{0}")]
    Http(HttpError),

    /// ハンドラーの戻り値をバイト列に変換できない
    #[error("Request handler for route \"{route}\" returned [{type_name}] which is not iterable.")]
    OutputType { route: String, type_name: String },

    /// 理由句を持たないステータスコード（設定ミス）
    #[error("Unknown HTTP status code: {0}")]
    UnknownStatus(u16),

    /// レスポンス文字コードでのエンコード失敗
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// ハンドラー内部の任意の失敗
    ///
    /// 作成時点のバックトレースを保持する。
    #[error("Handler error: {source}")]
    Handler {
        source: Box<dyn StdError + Send + Sync>,
        trace: FaultTrace,
    },

    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// プロセスレベルの致命的シグナル（常に呼び出し元へ伝播）
    #[error("Fatal: {0}")]
    Fatal(String),

    /// 内部サーバーエラー
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl Error {
    /// 任意のエラーをハンドラーエラーとして包む
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error::Handler {
            source: err.into(),
            trace: FaultTrace::capture(),
        }
    }

    /// メッセージだけのハンドラーエラーを作成
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Error::Handler {
            source: message.into(),
            trace: FaultTrace::capture(),
        }
    }

    /// 失敗した地点で取得したバックトレース
    pub fn trace(&self) -> Option<&FaultTrace> {
        match self {
            Error::Handler { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// エラーからHTTPステータスコードを取得
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidRequestBody(_) => 400,
            Error::PayloadTooLarge(_) => 413,
            Error::InvalidHeader(_) => 400,
            Error::InvalidCookie(_) => 400,
            Error::Http(e) => e.status(),
            _ => 500,
        }
    }

    /// リクエスト起因のエラーで、アボートとして扱えるものを返す
    pub fn as_abort(&self) -> Option<HttpError> {
        match self {
            Error::Http(e) => Some(e.clone()),
            Error::InvalidRequestBody(_)
            | Error::PayloadTooLarge(_) => Some(HttpError::new(self.status_code(), self.to_string())),
            _ => None,
        }
    }

    /// 致命的シグナルかどうか
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// 失敗した地点のバックトレース
pub struct FaultTrace(Backtrace);

impl FaultTrace {
    /// 環境変数に関わらず現在位置のバックトレースを取得する
    pub fn capture() -> Self {
        FaultTrace(Backtrace::force_capture())
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.0
    }
}

impl fmt::Debug for FaultTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultTrace").finish_non_exhaustive()
    }
}

impl From<HttpError> for Error {
    fn from(err: HttpError) -> Self {
        Error::Http(err)
    }
}
