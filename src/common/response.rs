//! レスポンスコンテキスト（送信レスポンスのリクエスト単位の構築）

use log::warn;

use crate::error::Error;
use super::cookie::Cookie;
use super::headers::HeaderList;
use super::utils::{charset_from_content_type, is_header_value_valid};

/// 既定のContent-Type
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";
/// 既定の文字コード
pub const DEFAULT_CHARSET: &str = "utf8";

/// レスポンスコンテキスト
#[derive(Debug, Clone)]
pub struct ResponseContext {
    status: u16,
    headers: HeaderList,
    charset: String,
    cookies: Vec<Cookie>,
}

impl Default for ResponseContext {
    fn default() -> Self {
        let mut headers = HeaderList::new();
        headers.set("Content-Type", DEFAULT_CONTENT_TYPE);
        Self {
            status: 200,
            headers,
            charset: DEFAULT_CHARSET.to_string(),
            cookies: Vec::new(),
        }
    }
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    /// ヘッダーを設定（同名ヘッダーは置き換え）
    ///
    /// CR/LFなどの制御文字を含む値は `InvalidHeader` になる。
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        if name.eq_ignore_ascii_case("content-type") {
            self.set_content_type(value);
        } else {
            self.headers.set(name, value);
        }
        Ok(())
    }

    /// ヘッダーを追加（同名ヘッダーがあっても追加）
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.headers.append(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Content-Typeを設定し、`charset=` があれば文字コードも更新
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        let content_type = content_type.into();
        if let Some(charset) = charset_from_content_type(&content_type) {
            self.charset = charset;
        }
        self.headers.set("Content-Type", content_type);
    }

    /// テキスト出力のエンコードに使う文字コード
    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) {
        self.charset = charset.into();
    }

    /// 送信するクッキーを設定（同名のクッキーは置き換え）
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.retain(|c| c.name != cookie.name);
        self.cookies.push(cookie);
    }

    /// 名前と値だけのクッキーを設定
    pub fn set_cookie_value(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.set_cookie(Cookie::try_new(name, value)?);
        Ok(())
    }

    /// クッキーを期限切れにして削除を指示
    pub fn delete_cookie(&mut self, name: &str) -> Result<(), Error> {
        let cookie = Cookie::try_new(name, "")?
            .with_path("/")
            .with_max_age(std::time::Duration::from_secs(0));
        self.set_cookie(cookie);
        Ok(())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// ゲートウェイへ渡すヘッダーリスト（名前はタイトルケース、クッキーごとにSet-Cookie）
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        let mut wire = self.headers.to_wire();
        wire.extend(
            self.cookies
                .iter()
                .map(|c| ("Set-Cookie".to_string(), c.to_header_value())),
        );
        wire
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), Error> {
    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !name_ok {
        warn!("Rejected invalid header name: {:?}", name);
        return Err(Error::InvalidHeader(format!("invalid header name: {:?}", name)));
    }
    if !is_header_value_valid(value) {
        warn!("Rejected invalid header value for {}", name);
        return Err(Error::InvalidHeader(format!("invalid value for header {}", name)));
    }
    Ok(())
}
