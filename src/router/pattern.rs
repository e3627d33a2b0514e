//! ルートパターンの分類と正規表現への変換

use log::warn;
use regex::Regex;

use crate::error::Error;

/// 登録時のパターン正規化（前後の `$ ^ /` と空白を除去）
pub fn normalize_pattern(pattern: &str) -> &str {
    pattern
        .trim()
        .trim_start_matches(|c: char| matches!(c, '$' | '^' | '/') || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '$' | '^' | '/') || c.is_whitespace())
}

/// 英数字とアンダースコアだけのセグメントを `/` で繋いだパスか
///
/// 該当するパターンは静的ルートとして完全一致で引く。
pub fn is_static_pattern(pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('/').collect();
    let (last, init) = match segments.split_last() {
        Some(split) => split,
        None => return true,
    };
    init.iter().all(|s| !s.is_empty() && s.chars().all(is_ascii_word))
        && last.chars().all(is_ascii_word)
}

fn is_ascii_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// セグメント単位の形状（`/` をまたがない部分だけで構成されるパターン用）
#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentShape {
    /// 英数字・`_`・`-` だけのリテラル
    Literal(String),
    /// `:name` 一つだけのセグメント
    Param,
}

/// パターンをセグメント形状の列に分解する
///
/// 拡張形式や正規表現のメタ文字を含むセグメントがあれば `None`。
fn segment_shapes(pattern: &str) -> Option<Vec<SegmentShape>> {
    pattern
        .split('/')
        .map(|segment| {
            if segment.chars().all(|c| is_ascii_word(c) || c == '-') {
                Some(SegmentShape::Literal(segment.to_string()))
            } else if segment
                .strip_prefix(':')
                .map(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_'))
                .unwrap_or(false)
            {
                Some(SegmentShape::Param)
            } else {
                None
            }
        })
        .collect()
}

/// 二つのパターンが同じパスに一致し得ないと証明できるか
///
/// セグメント数が異なるか、同じ位置に異なるリテラルがある場合だけtrue。
/// 判定できないパターンは重なり得るものとしてfalse。
pub fn patterns_disjoint(a: &str, b: &str) -> bool {
    let (Some(a), Some(b)) = (segment_shapes(a), segment_shapes(b)) else {
        return false;
    };
    if a.len() != b.len() {
        return true;
    }
    a.iter().zip(&b).any(|pair| match pair {
        (SegmentShape::Literal(x), SegmentShape::Literal(y)) => x != y,
        _ => false,
    })
}

/// パラメータ記法を名前付きキャプチャに置き換えた正規表現ソースを生成
///
/// - `:name` は `(?P<name>[^/]+)`
/// - `:name<d>regex<d>`（`<d>` は英数字・`_`・`/` 以外の任意の1文字）は `(?P<name>regex)`
///
/// 閉じデリミタが無い場合は短縮形として扱い、デリミタ文字はそのまま残る。
pub fn translate_pattern(pattern: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = pattern.chars().collect();
    let mut source = String::with_capacity(pattern.len() + 16);
    let mut names = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != ':' {
            source.push(chars[i]);
            i += 1;
            continue;
        }

        let name_start = i + 1;
        let mut name_end = name_start;
        while name_end < chars.len() && (chars[name_end].is_ascii_alphabetic() || chars[name_end] == '_') {
            name_end += 1;
        }
        if name_end == name_start {
            source.push(':');
            i += 1;
            continue;
        }
        let name: String = chars[name_start..name_end].iter().collect();

        // 拡張形式: デリミタの後に1文字以上を挟んで同じデリミタが現れる
        if let Some(&delim) = chars.get(name_end) {
            if !is_word(delim) && delim != '/' {
                let body_start = name_end + 1;
                let close = (body_start + 1..chars.len()).find(|&j| chars[j] == delim);
                if let Some(close) = close {
                    let custom: String = chars[body_start..close].iter().collect();
                    source.push_str(&format!("(?P<{}>{})", name, custom));
                    names.push(name);
                    i = close + 1;
                    continue;
                }
            }
        }

        source.push_str(&format!("(?P<{}>[^/]+)", name));
        names.push(name);
        i = name_end;
    }

    (source, names)
}

/// 正規化済みパターンを `^...$` でアンカーしてコンパイル
pub fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>), Error> {
    let (source, names) = translate_pattern(pattern);
    let anchored = format!("^{}$", source);
    let regex = Regex::new(&anchored).map_err(|e| {
        warn!("Rejected route pattern '{}': {}", pattern, e);
        Error::InvalidRoute {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok((regex, names))
}
