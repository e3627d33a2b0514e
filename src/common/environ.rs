//! ゲートウェイから渡される受信リクエスト記述子

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use super::body::Body;
use super::headers::HeaderList;

/// ゲートウェイが提供する効率的なファイル送出機能
#[cfg_attr(test, mockall::automock)]
pub trait FileWrapper: Send + Sync {
    /// 読み出し可能なリソースをボディに変換
    fn wrap(&self, reader: Box<dyn Read + Send>, block_size: usize) -> Body;
}

/// 受信リクエスト記述子
///
/// メソッド・パス・クエリ文字列・ヘッダー・ボディストリームに加え、
/// 診断出力用のエラーストリームとCGI形式の生の変数を保持する。
pub struct Environ {
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub headers: HeaderList,
    pub content_length: Option<usize>,
    input: Box<dyn Read + Send>,
    errors: Box<dyn Write + Send>,
    file_wrapper: Option<Arc<dyn FileWrapper>>,
    vars: HashMap<String, String>,
}

impl Environ {
    /// 新しいEnviron（ボディなし、エラー出力は標準エラー）
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query_string: String::new(),
            headers: HeaderList::new(),
            content_length: None,
            input: Box::new(io::empty()),
            errors: Box::new(io::stderr()),
            file_wrapper: None,
            vars: HashMap::new(),
        }
    }

    /// クエリ文字列を設定
    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    /// ヘッダーを追加
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// メモリ上のボディを設定
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.content_length = Some(body.len());
        self.input = Box::new(Cursor::new(body));
        self
    }

    /// 任意のストリームをボディとして設定
    pub fn with_input(mut self, input: Box<dyn Read + Send>, content_length: Option<usize>) -> Self {
        self.input = input;
        self.content_length = content_length;
        self
    }

    /// 診断出力先を設定
    pub fn with_errors(mut self, errors: Box<dyn Write + Send>) -> Self {
        self.errors = errors;
        self
    }

    /// ファイル送出機能を設定
    pub fn with_file_wrapper(mut self, wrapper: Arc<dyn FileWrapper>) -> Self {
        self.file_wrapper = Some(wrapper);
        self
    }

    /// 生の変数（`REMOTE_ADDR` など）を設定
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// ヘッダー値を取得
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// CGI形式の変数を取得
    ///
    /// 明示的に設定された値を優先し、無ければリクエスト行とヘッダーから導出する。
    pub fn var(&self, key: &str) -> Option<String> {
        if let Some(v) = self.vars.get(key) {
            return Some(v.clone());
        }
        match key {
            "REQUEST_METHOD" => Some(self.method.clone()),
            "PATH_INFO" => Some(self.path.clone()),
            "QUERY_STRING" => Some(self.query_string.clone()),
            "CONTENT_LENGTH" => self.content_length.map(|n| n.to_string()),
            "CONTENT_TYPE" => self.header("content-type").map(str::to_string),
            _ => {
                let name = key.strip_prefix("HTTP_")?.replace('_', "-");
                self.header(&name).map(str::to_string)
            }
        }
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn file_wrapper(&self) -> Option<&Arc<dyn FileWrapper>> {
        self.file_wrapper.as_ref()
    }

    /// 診断出力ストリーム
    pub fn errors(&mut self) -> &mut (dyn Write + Send) {
        self.errors.as_mut()
    }

    /// ボディストリームを取り出す（以降は空のストリームになる）
    pub(crate) fn take_input(&mut self) -> Box<dyn Read + Send> {
        std::mem::replace(&mut self.input, Box::new(io::empty()))
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query_string", &self.query_string)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("file_wrapper", &self.file_wrapper.is_some())
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_derivation() {
        let env = Environ::new("post", "/submit")
            .with_query_string("a=1")
            .with_header("Content-Type", "application/json")
            .with_header("X-Auth-Token", "t0k3n")
            .with_body(b"{}".to_vec())
            .with_var("REMOTE_ADDR", "10.0.0.1");

        assert_eq!(env.var("REQUEST_METHOD").as_deref(), Some("post"));
        assert_eq!(env.var("PATH_INFO").as_deref(), Some("/submit"));
        assert_eq!(env.var("QUERY_STRING").as_deref(), Some("a=1"));
        assert_eq!(env.var("CONTENT_LENGTH").as_deref(), Some("2"));
        assert_eq!(env.var("CONTENT_TYPE").as_deref(), Some("application/json"));
        assert_eq!(env.var("HTTP_X_AUTH_TOKEN").as_deref(), Some("t0k3n"));
        assert_eq!(env.var("REMOTE_ADDR").as_deref(), Some("10.0.0.1"));
        assert_eq!(env.var("SERVER_NAME"), None);
    }

    #[test]
    fn test_take_input_leaves_empty_stream() {
        let mut env = Environ::new("POST", "/").with_body(b"payload".to_vec());
        let mut first = String::new();
        env.take_input().read_to_string(&mut first).unwrap();
        assert_eq!(first, "payload");

        let mut second = String::new();
        env.take_input().read_to_string(&mut second).unwrap();
        assert!(second.is_empty());
    }
}
