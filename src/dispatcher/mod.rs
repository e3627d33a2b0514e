//! ディスパッチャー: 1リクエストを束縛・解決・実行・キャスト・確定する

mod cast;
pub mod config;
pub mod core;
mod trace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::common::Body;

pub use self::config::DispatcherConfig;
pub use self::core::{Dispatcher, DispatcherBuilder};

/// ゲートウェイへ返す確定済みレスポンス
#[derive(Debug)]
pub struct GatewayResponse {
    /// `200 OK` 形式のステータス行
    pub status_line: String,
    /// タイトルケースのヘッダー名と値（Set-Cookieはクッキーごと）
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl GatewayResponse {
    /// ステータスコード
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .next()
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    /// ヘッダー値を取得（大文字小文字区別なし）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// ボディを全て読み出す
    pub fn into_body_bytes(self) -> std::io::Result<Vec<u8>> {
        self.body.into_bytes()
    }
}

/// 配信の停止・再開を切り替える管理用スイッチ
///
/// 停止中のリクエストは503で応答する。
#[derive(Debug, Clone)]
pub struct ServeSwitch {
    serving: Arc<AtomicBool>,
}

impl Default for ServeSwitch {
    fn default() -> Self {
        Self {
            serving: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl ServeSwitch {
    pub fn stop(&self) {
        info!("Serving stopped");
        self.serving.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        info!("Serving resumed");
        self.serving.store(true, Ordering::SeqCst);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}
