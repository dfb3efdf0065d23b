//! Logging initialization.
//!
//! Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`
//! (defaulting to `info`).

use tracing_subscriber::EnvFilter;

/// グローバルなtracingサブスクライバを初期化する
///
/// 二重初期化はエラーになる（テストから複数回呼ばれた場合など）。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()?;

    Ok(())
}
