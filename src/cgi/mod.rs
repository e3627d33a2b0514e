//! CGI環境での実行をサポートするモジュール
//!
//! 環境変数と標準入力から [`Environ`](crate::common::Environ) を構築し、
//! ディスパッチャーの結果を標準出力へCGIレスポンス形式で書き出す。

pub mod validation;
pub mod error_logging;
pub mod request;
pub mod response;
pub mod core;

pub use self::core::run_cgi;

#[cfg(test)]
mod tests;
