//! 挿入順を保持し、名前を大文字小文字区別なしで引けるヘッダーリスト

/// HTTPヘッダーのリスト
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// 空のヘッダーリストを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 最初に見つかった値を取得
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 同名ヘッダーの全ての値を取得
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 既存の同名ヘッダーを全て削除してから末尾に追加
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// 同名ヘッダーがあっても末尾に追加
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// 同名ヘッダーを全て削除し、削除件数を返す
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ゲートウェイへ渡す形式（名前はタイトルケース）に変換
    pub fn to_wire(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (title_case(k), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (k, v) in iter {
            list.append(k, v);
        }
        list
    }
}

/// `content-type` -> `Content-Type`
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c.is_ascii_alphabetic() {
            if upper_next {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c.to_ascii_lowercase());
            }
            upper_next = false;
        } else {
            out.push(c);
            upper_next = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = HeaderList::new();
        headers.set("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.contains("Content-type"));
        assert_eq!(headers.get("Location"), None);
    }

    #[test]
    fn test_set_replaces_and_append_keeps() {
        let mut headers = HeaderList::new();
        headers.append("X-A", "1");
        headers.append("x-a", "2");
        headers.append("X-B", "3");
        assert_eq!(headers.get_all("X-A").collect::<Vec<_>>(), vec!["1", "2"]);

        headers.set("X-A", "9");
        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-B", "X-A"]);
        assert_eq!(headers.get("x-a"), Some("9"));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let headers: HeaderList = vec![("b", "1"), ("a", "2"), ("c", "3")].into_iter().collect();
        let wire = headers.to_wire();
        assert_eq!(
            wire,
            vec![
                ("B".to_string(), "1".to_string()),
                ("A".to_string(), "2".to_string()),
                ("C".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("SET-COOKIE"), "Set-Cookie");
        assert_eq!(title_case("x-request-id"), "X-Request-Id");
        assert_eq!(title_case("x-b3-traceid"), "X-B3-Traceid");
    }

    #[test]
    fn test_remove_counts() {
        let mut headers = HeaderList::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.remove("SET-COOKIE"), 2);
        assert!(headers.is_empty());
    }
}
