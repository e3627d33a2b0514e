//! レスポンスボディ（バイトチャンクの列）

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;
use log::warn;

/// ストリームを読み出す際のチャンクサイズ
pub const CHUNK_SIZE: usize = 8192;

/// ゲートウェイへ返すバイトチャンク列
pub struct Body {
    inner: BodyInner,
}

enum BodyInner {
    Chunks(VecDeque<Bytes>),
    Stream(Box<dyn Iterator<Item = io::Result<Bytes>> + Send>),
}

impl Body {
    /// 空のボディ
    pub fn empty() -> Self {
        Self::from_chunks(Vec::new())
    }

    /// 確定済みのチャンク列からボディを作成
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self {
            inner: BodyInner::Chunks(chunks.into()),
        }
    }

    /// 遅延生成されるチャンク列からボディを作成
    pub fn from_stream<I>(stream: I) -> Self
    where
        I: Iterator<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: BodyInner::Stream(Box::new(stream)),
        }
    }

    /// 読み出し可能なリソースを固定サイズのチャンク列に変換
    pub fn from_reader(reader: Box<dyn Read + Send>, block_size: usize) -> Self {
        Self::from_stream(ReadChunks::new(reader, block_size))
    }

    /// 確定済みのチャンク（ストリームの場合はNone）
    pub fn chunks(&self) -> Option<&VecDeque<Bytes>> {
        match &self.inner {
            BodyInner::Chunks(chunks) => Some(chunks),
            BodyInner::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.inner, BodyInner::Stream(_))
    }

    /// 全チャンクを連結して取得
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Iterator for Body {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            BodyInner::Chunks(chunks) => chunks.pop_front().map(Ok),
            BodyInner::Stream(stream) => stream.next(),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            BodyInner::Chunks(chunks) => f.debug_tuple("Body::Chunks").field(chunks).finish(),
            BodyInner::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

/// `Read` を `block_size` ごとのチャンクとして読み出すイテレータ
///
/// 読み終えた時点（またはエラー時）でリソースを破棄して閉じる。
pub struct ReadChunks {
    reader: Option<Box<dyn Read + Send>>,
    block_size: usize,
}

impl ReadChunks {
    pub fn new(reader: Box<dyn Read + Send>, block_size: usize) -> Self {
        Self {
            reader: Some(reader),
            block_size: block_size.max(1),
        }
    }

    /// リソースがまだ開いているか
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl Iterator for ReadChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut buf = vec![0u8; self.block_size];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(Bytes::from(buf)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to read response stream: {}", e);
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
