//! 制御フローシグナル（アボート・早期終了・致命的シグナル）

use std::fmt;

use crate::common::reason_phrase;
use crate::handler::Output;

/// ハンドラーが送出するHTTPエラー（アボート）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status: u16,
    message: String,
    url: Option<String>,
    traceback: Option<String>,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            url: None,
            traceback: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 発生元のパス
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// ステータスの標準エラー名
    pub fn error_name(&self) -> &'static str {
        reason_phrase(self.status).unwrap_or("Unknown")
    }

    /// 既定のHTMLエラーページを生成
    pub fn render(&self) -> String {
        let name = self.error_name();
        let mut html = format!(
            concat!(
                "<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML 2.0//EN\">\n",
                "<html>\n",
                "    <head>\n",
                "        <title>Error {status}: {name}</title>\n",
                "    </head>\n",
                "    <body>\n",
                "        <h1>Error {status}: {name}</h1>\n",
                "        <p>Sorry, the requested URL <tt>{url}</tt> caused an error:</p>\n",
                "        <pre>{message}</pre>\n",
            ),
            status = self.status,
            name = name,
            url = html_escape(self.url.as_deref().unwrap_or("")),
            message = html_escape(&self.message),
        );
        if let Some(traceback) = &self.traceback {
            html.push_str(&format!(
                "        <h2>Traceback:</h2>\n        <pre>{}</pre>\n",
                html_escape(traceback)
            ));
        }
        html.push_str("    </body>\n</html>\n");
        html
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.error_name(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// ハンドラー呼び出しの結果
#[derive(Debug)]
pub enum Outcome {
    /// 通常の戻り値（キャストされる）
    Normal(Output),
    /// 指定ステータスでの中断
    Abort(HttpError),
    /// 確定済みの出力（キャストを経ずにそのまま送出）
    Finish(Output),
}

/// 指定ステータスで処理を中断する
pub fn abort(status: u16, message: impl Into<String>) -> Outcome {
    Outcome::Abort(HttpError::new(status, message))
}

/// 確定済みの出力で処理を終える
pub fn finish(output: impl Into<Output>) -> Outcome {
    Outcome::Finish(output.into())
}

/// ハンドラーの戻り値から `Outcome` への変換
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome {
        self
    }
}

impl IntoOutcome for HttpError {
    fn into_outcome(self) -> Outcome {
        Outcome::Abort(self)
    }
}

impl IntoOutcome for Output {
    fn into_outcome(self) -> Outcome {
        Outcome::Normal(self)
    }
}

/// パニックのペイロードとして使うプロセスレベルの致命的シグナル
///
/// キャッチオール設定に関わらず、ディスパッチャーは常にこのパニックを再送出する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalSignal(pub String);

/// 致命的シグナルでパニックする
pub fn raise_fatal(reason: impl Into<String>) -> ! {
    std::panic::panic_any(FatalSignal(reason.into()))
}

pub(crate) fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
