//! ディスパッチャーの設定

use log::debug;

use crate::common::utils::{env_flag, get_max_body_size, DEFAULT_MAX_BODY_SIZE};

/// ディスパッチャーの動作設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// 未処理の失敗を500ページに変換する（falseなら呼び出し元へ伝播）
    pub catchall: bool,
    /// マッピングをJSONとして出力する
    pub autojson: bool,
    /// よく一致するパターンルートを前へ移動する
    pub optimize: bool,
    /// リクエストボディの上限（バイト）
    pub max_body_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            catchall: true,
            autojson: true,
            optimize: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数から設定を読み込む
    ///
    /// `ROOST_CATCHALL` / `ROOST_AUTOJSON` / `ROOST_OPTIMIZE` / `ROOST_MAX_BODY_SIZE`。
    /// 未設定・不正な値は既定値になる。
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            catchall: env_flag("ROOST_CATCHALL", defaults.catchall),
            autojson: env_flag("ROOST_AUTOJSON", defaults.autojson),
            optimize: env_flag("ROOST_OPTIMIZE", defaults.optimize),
            max_body_size: get_max_body_size(),
        };
        debug!("Loaded dispatcher config from environment: {:?}", config);
        config
    }

    pub fn with_catchall(mut self, catchall: bool) -> Self {
        self.catchall = catchall;
        self
    }

    pub fn with_autojson(mut self, autojson: bool) -> Self {
        self.autojson = autojson;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert!(config.catchall);
        assert!(config.autojson);
        assert!(!config.optimize);
        assert_eq!(config.max_body_size, 5 * 1024 * 1024);
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("ROOST_CATCHALL", Some("false")),
                ("ROOST_AUTOJSON", Some("0")),
                ("ROOST_OPTIMIZE", Some("yes")),
                ("ROOST_MAX_BODY_SIZE", Some("2048")),
            ],
            || {
                let config = DispatcherConfig::from_env();
                assert_eq!(
                    config,
                    DispatcherConfig {
                        catchall: false,
                        autojson: false,
                        optimize: true,
                        max_body_size: 2048,
                    }
                );
            },
        );
    }

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        temp_env::with_vars(
            [
                ("ROOST_CATCHALL", Some("sometimes")),
                ("ROOST_AUTOJSON", None),
                ("ROOST_OPTIMIZE", None),
                ("ROOST_MAX_BODY_SIZE", Some("-1")),
            ],
            || {
                assert_eq!(DispatcherConfig::from_env(), DispatcherConfig::default());
            },
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = DispatcherConfig::new()
            .with_catchall(false)
            .with_autojson(false)
            .with_optimize(true)
            .with_max_body_size(10);
        assert!(!config.catchall && !config.autojson && config.optimize);
        assert_eq!(config.max_body_size, 10);
    }
}
