//! ワーカーヘルスプローバー
//!
//! ワーカーの `/health` に単発のGETを発行して真偽のみを返す。
//! プローバー自体は状態を持たず、何も変更しない。

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

/// ワーカーヘルスプローバー
///
/// タイムアウトはクライアント生成時に焼き込まれる。2xxなら健康、
/// それ以外（非2xx・タイムアウト・ネットワークエラー）はすべて不健康。
#[derive(Clone)]
pub struct HealthProber {
    /// HTTPクライアント
    client: Client,
}

impl HealthProber {
    /// 指定タイムアウトのプローバーを作成
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// 単一ワーカーのヘルスチェック
    ///
    /// `during_startup` はログの冗長度のみを変える（戻り値には影響しない）。
    pub async fn probe(&self, base_url: &str, during_startup: bool) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "Health probe succeeded");
                true
            }
            Ok(response) => {
                if during_startup {
                    debug!(url = %url, status = %response.status(), "Health probe not ready");
                } else {
                    warn!(url = %url, status = %response.status(), "Health probe failed");
                }
                false
            }
            Err(e) => {
                if during_startup {
                    debug!(url = %url, error = %e, "Health probe not ready");
                } else {
                    warn!(url = %url, error = %e, "Health probe failed");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_connection_refused_is_unhealthy() {
        let prober = HealthProber::new(Duration::from_millis(500));
        // 未使用ポートへの接続は拒否される
        assert!(!prober.probe("http://127.0.0.1:1", false).await);
    }

    #[tokio::test]
    async fn test_startup_flag_does_not_change_result() {
        let prober = HealthProber::new(Duration::from_millis(500));
        let normal = prober.probe("http://127.0.0.1:1", false).await;
        let startup = prober.probe("http://127.0.0.1:1", true).await;
        assert_eq!(normal, startup);
    }
}
