//! CGI環境でのエントリポイント
//!
//! CGI環境で実行される際のメインプログラム

use env_logger::Env;
use log::{error, info};
use roost::{cgi, DispatcherConfig};

// サンプルアプリケーションの実装
mod sample_handler;

fn main() {
    // CGIでは標準出力がHTTPレスポンスとなるため、ログは標準エラー出力に出力する
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("Starting Roost CGI application");

    let app = match sample_handler::build_app(DispatcherConfig::from_env()) {
        Ok(app) => app,
        Err(err) => {
            error!("Failed to build application: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = cgi::run_cgi(&app) {
        error!("Error running CGI application: {:?}", err);
        std::process::exit(1);
    }

    info!("CGI request processed successfully");
}
