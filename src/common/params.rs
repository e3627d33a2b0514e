//! クエリ・フォームパラメータの解析
//!
//! 同じキーが1回だけ現れた場合は単一の文字列、2回以上現れた場合は
//! 出現順のシーケンスとして保持する。

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;

use crate::error::Error;
use super::utils::percent_decode;

/// パラメータ値（単一値または複数値）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    /// 単一値を取得（複数値の場合は最後の値）
    pub fn as_str(&self) -> &str {
        match self {
            ParamValue::Single(v) => v,
            ParamValue::Multi(vs) => vs.last().map(String::as_str).unwrap_or(""),
        }
    }

    /// 全ての値を出現順に取得
    pub fn values(&self) -> Vec<&str> {
        match self {
            ParamValue::Single(v) => vec![v.as_str()],
            ParamValue::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ParamValue::Multi(_))
    }
}

impl PartialEq<&str> for ParamValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, ParamValue::Single(v) if v == other)
    }
}

/// 値をキーごとに出現順で集め、最後に単一/複数へ振り分けるためのマルチマップ
#[derive(Debug)]
pub struct MultiDict<V> {
    values: HashMap<String, Vec<V>>,
}

impl<V> Default for MultiDict<V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<V> MultiDict<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: V) {
        self.values.entry(key.into()).or_default().push(value);
    }

    pub fn into_lists(self) -> HashMap<String, Vec<V>> {
        self.values
    }
}

impl MultiDict<String> {
    /// 1件のキーは単一値、2件以上は複数値に変換
    pub fn demote(self) -> HashMap<String, ParamValue> {
        self.values
            .into_iter()
            .map(|(k, mut vs)| {
                let value = if vs.len() == 1 {
                    ParamValue::Single(vs.remove(0))
                } else {
                    ParamValue::Multi(vs)
                };
                (k, value)
            })
            .collect()
    }
}

/// クエリ文字列をパースしてURLデコードを行う（空の値も保持）
pub fn parse_query_string(query_string: &str) -> HashMap<String, ParamValue> {
    collect_pairs(query_string).demote()
}

/// `a=1&b=2;c=3` 形式をキー順に収集する
pub fn collect_pairs(input: &str) -> MultiDict<String> {
    let mut dict = MultiDict::new();
    for pair in input.split(['&', ';']) {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        if let Some(key) = parts.next() {
            let value = parts.next().unwrap_or("");
            dict.push(percent_decode(key), percent_decode(value));
        }
    }
    dict
}

/// multipart/form-data のパート
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// アップロードされたファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Content-Type ヘッダーから multipart の boundary を取り出す
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

/// multipart/form-data ボディをパートに分解する
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<MultipartPart>, Error> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| Error::InvalidRequestBody("multipart boundary not found".to_string()))?;

    loop {
        pos += delimiter.len();
        // 終端デリミタ
        if body[pos..].starts_with(b"--") {
            break;
        }
        pos = skip_line_break(body, pos);

        let next = find(body, &delimiter, pos).ok_or_else(|| {
            Error::InvalidRequestBody("unterminated multipart body".to_string())
        })?;
        // デリミタ直前の改行はパートの内容に含めない
        let mut end = next;
        if end >= 2 && &body[end - 2..end] == b"\r\n" {
            end -= 2;
        } else if end >= 1 && body[end - 1] == b'\n' {
            end -= 1;
        }

        parts.push(parse_part(&body[pos..end.max(pos)])?);
        pos = next;
    }

    Ok(parts)
}

fn parse_part(raw: &[u8]) -> Result<MultipartPart, Error> {
    let (head, data) = match find(raw, b"\r\n\r\n", 0) {
        Some(i) => (&raw[..i], &raw[i + 4..]),
        None => match find(raw, b"\n\n", 0) {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None => return Err(Error::InvalidRequestBody("multipart part without headers".to_string())),
        },
    };

    let head = String::from_utf8_lossy(head);
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in head.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for attr in value.split(';').map(str::trim) {
                if let Some(v) = attr.strip_prefix("name=") {
                    name = Some(v.trim_matches('"').to_string());
                } else if let Some(v) = attr.strip_prefix("filename=") {
                    filename = Some(v.trim_matches('"').to_string());
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let name = name.ok_or_else(|| {
        Error::InvalidRequestBody("multipart part without a name".to_string())
    })?;

    Ok(MultipartPart {
        name,
        filename,
        content_type,
        data: Bytes::copy_from_slice(data),
    })
}

fn skip_line_break(body: &[u8], pos: usize) -> usize {
    if body[pos..].starts_with(b"\r\n") {
        pos + 2
    } else if body[pos..].starts_with(b"\n") {
        pos + 1
    } else {
        pos
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("name=John&age=30&city=Tokyo");

        assert_eq!(params.get("name"), Some(&ParamValue::Single("John".to_string())));
        assert_eq!(params.get("age"), Some(&ParamValue::Single("30".to_string())));
        assert_eq!(params.get("city"), Some(&ParamValue::Single("Tokyo".to_string())));
    }

    #[test]
    fn test_query_demotion() {
        let params = parse_query_string("tag=a&one=1&tag=b&tag=c");

        assert_eq!(params["one"], "1");
        assert_eq!(
            params["tag"],
            ParamValue::Multi(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert!(params["tag"].is_multi());
        assert_eq!(params["tag"].values(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_query_blank_values_kept() {
        let params = parse_query_string("empty=&flag&x=1");
        assert_eq!(params["empty"], "");
        assert_eq!(params["flag"], "");
        assert_eq!(params.len(), 3);
        assert!(parse_query_string("").is_empty());
    }

    #[test]
    fn test_query_url_encoding() {
        let params = parse_query_string("name=%E3%81%82%E3%81%84&city=Tokyo%20Station&q=a+b");
        assert_eq!(params["name"], "あい");
        assert_eq!(params["city"], "Tokyo Station");
        assert_eq!(params["q"], "a b");
    }

    #[test]
    fn test_multi_dict_value_order() {
        let mut dict = MultiDict::new();
        dict.push("b", 1);
        dict.push("a", 2);
        dict.push("b", 3);
        let lists = dict.into_lists();
        assert_eq!(lists["b"], vec![1, 3]);
        assert_eq!(lists["a"], vec![2]);
    }

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=XyZ"),
            Some("XyZ".to_string())
        );
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(multipart_boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_parse_multipart() {
        let body = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "hello\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "line1\r\nline2\r\n",
            "--XyZ--\r\n",
        );

        let parts = parse_multipart(body.as_bytes(), "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "title");
        assert_eq!(parts[0].filename, None);
        assert_eq!(&parts[0].data[..], b"hello");
        assert_eq!(parts[1].name, "file");
        assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(&parts[1].data[..], b"line1\r\nline2");
    }

    #[test]
    fn test_parse_multipart_errors() {
        assert!(parse_multipart(b"no boundary here", "XyZ").is_err());
        assert!(parse_multipart(b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nx", "XyZ").is_err());
    }
}
