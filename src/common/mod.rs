//! 共通の型と機能

pub mod body;
pub mod cookie;
pub mod environ;
pub mod headers;
pub mod params;
pub mod request;
pub mod response;
pub mod utils;

pub use body::{Body, ReadChunks, CHUNK_SIZE};
pub use cookie::{parse_cookie_header, Cookie, SameSite};
pub use environ::{Environ, FileWrapper};
pub use headers::HeaderList;
pub use params::{FileUpload, ParamValue};
pub use request::RequestContext;
pub use response::ResponseContext;

/// ステータスコードの標準理由句を取得（未知のコードはNone）
pub fn reason_phrase(status: u16) -> Option<&'static str> {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
}
