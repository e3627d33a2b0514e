//! ハンドラーの戻り値

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::signal::{IntoOutcome, Outcome};

/// ハンドラーが返す生の出力
pub enum Output {
    /// 空の出力
    Empty,
    /// JSON値（オブジェクトはauto-JSONでシリアライズされる）
    Json(Value),
    /// テキスト（レスポンスの文字コードでエンコード）
    Text(String),
    /// バイト列
    Bytes(Bytes),
    /// テキストの列（要素ごとにエンコード）
    Lines(Vec<String>),
    /// 読み出し可能なリソース（チャンク単位で送出し、読み終えたら閉じる）
    Stream(Box<dyn Read + Send>),
}

impl Output {
    /// 任意のシリアライズ可能な値をJSON出力に変換
    pub fn json<T: Serialize>(value: &T) -> Result<Self, Error> {
        serde_json::to_value(value)
            .map(Output::Json)
            .map_err(Error::handler)
    }

    /// ストリーム出力を作成
    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Output::Stream(Box::new(reader))
    }

    /// エラーメッセージ用の型名
    pub fn kind(&self) -> &'static str {
        match self {
            Output::Empty => "empty",
            Output::Json(value) => json_kind(value),
            Output::Text(_) => "text",
            Output::Bytes(_) => "bytes",
            Output::Lines(_) => "lines",
            Output::Stream(_) => "stream",
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Empty => f.write_str("Empty"),
            Output::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Output::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Output::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Output::Lines(l) => f.debug_tuple("Lines").field(l).finish(),
            Output::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<()> for Output {
    fn from(_: ()) -> Self {
        Output::Empty
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Output::Text(text.to_string())
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Output::Text(text)
    }
}

impl From<Vec<u8>> for Output {
    fn from(bytes: Vec<u8>) -> Self {
        Output::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for Output {
    fn from(bytes: Bytes) -> Self {
        Output::Bytes(bytes)
    }
}

impl From<Vec<String>> for Output {
    fn from(lines: Vec<String>) -> Self {
        Output::Lines(lines)
    }
}

impl From<Vec<&str>> for Output {
    fn from(lines: Vec<&str>) -> Self {
        Output::Lines(lines.into_iter().map(str::to_string).collect())
    }
}

impl From<bool> for Output {
    fn from(flag: bool) -> Self {
        Output::Json(Value::Bool(flag))
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Json(value)
    }
}

impl From<Map<String, Value>> for Output {
    fn from(map: Map<String, Value>) -> Self {
        Output::Json(Value::Object(map))
    }
}

impl From<HashMap<String, Value>> for Output {
    fn from(map: HashMap<String, Value>) -> Self {
        Output::Json(Value::Object(map.into_iter().collect()))
    }
}

impl From<HashMap<String, String>> for Output {
    fn from(map: HashMap<String, String>) -> Self {
        Output::Json(Value::Object(
            map.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
        ))
    }
}

impl From<Box<dyn Read + Send>> for Output {
    fn from(reader: Box<dyn Read + Send>) -> Self {
        Output::Stream(reader)
    }
}

impl From<std::fs::File> for Output {
    fn from(file: std::fs::File) -> Self {
        Output::Stream(Box::new(file))
    }
}

impl<T: Into<Output>> From<Option<T>> for Output {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Output::Empty)
    }
}

macro_rules! normal_outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Outcome {
                    Outcome::Normal(self.into())
                }
            }
        )*
    };
}

normal_outcome!(
    (),
    &str,
    String,
    Vec<u8>,
    Bytes,
    Vec<String>,
    Vec<&str>,
    bool,
    Value,
    Map<String, Value>,
    HashMap<String, Value>,
    HashMap<String, String>,
    Box<dyn Read + Send>,
    std::fs::File,
);

impl<T: Into<Output>> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(self.into())
    }
}
