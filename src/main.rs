//! whisperlb Server Entry Point

use clap::Parser;
use tracing::{error, info};
use whisperlb::config::{env_or, env_parse, PoolConfig};
use whisperlb::pool::WorkerPool;
use whisperlb::{api, logging, AppState};

#[derive(Clone)]
struct ServerConfig {
    host: String,
    port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        let host = env_or("WHISPERLB_HOST", "0.0.0.0");
        let port = env_parse("WHISPERLB_PORT", 8000);
        Self { host, port }
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// whisper-server群を監督するロードバランサー
#[derive(Parser)]
#[command(name = "whisperlb", version, about)]
struct Cli {
    /// バインドするホストアドレス（デフォルト: WHISPERLB_HOST または 0.0.0.0）
    #[arg(long)]
    host: Option<String>,

    /// バインドするポート番号（デフォルト: WHISPERLB_PORT または 8000）
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    logging::init().expect("failed to initialize logging");

    let cli = Cli::parse();

    let mut server_config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }

    let pool_config = PoolConfig::from_env();
    let pool = WorkerPool::new(pool_config);

    if let Err(e) = pool.init().await {
        error!(error = %e, "Failed to initialize worker pool");
        std::process::exit(1);
    }

    let app = api::router(AppState { pool: pool.clone() });

    let addr = server_config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind server address");
            pool.dispose().await;
            std::process::exit(1);
        }
    };

    info!(addr = %addr, "whisperlb listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // タイマー停止 → ワーカー停止の順で畳む
    pool.dispose().await;

    if let Err(e) = serve_result {
        error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }

    info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        return;
    }
    info!("Shutdown signal received");
}
