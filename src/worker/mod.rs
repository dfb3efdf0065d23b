//! ワーカープロセス制御
//!
//! 監督対象の子プロセス1つ分の状態（[`WorkerHandle`]）と、
//! プロセスの起動・停止を担うドライバ（[`driver`]）。

pub mod driver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use uuid::Uuid;

use crate::common::types::{millis_since, WorkerSnapshot};

/// ワーカーの状態
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// 起動中（初回ヘルスチェック待ち）
    #[default]
    Starting,
    /// 稼働中
    Healthy,
    /// 異常（交代待ち）
    Unhealthy,
    /// 停止済み
    Stopped,
}

impl WorkerState {
    /// WorkerStateを文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 監督対象ワーカー1つ分の管理状態
///
/// `id` はワーカーの生存期間を通じて不変。ポートはプール内で一意であり、
/// 交代時は旧ワーカーがレジストリから外れてから新ワーカーの起動が始まる。
#[derive(Debug)]
pub struct WorkerHandle {
    /// ワーカーID（スポーン時に採番）
    pub id: Uuid,
    /// 子プロセスのリッスンポート（バックオフ管理のキーでもある）
    pub port: u16,
    /// `http://127.0.0.1:<port>`
    pub base_url: String,
    /// OSの子プロセスハンドル
    pub process: Child,
    /// 状態
    pub state: WorkerState,
    /// このワーカーに振り分けたリクエスト数（単調増加）
    pub request_count: u64,
    /// 連続プローブ失敗数（成功で0に戻る）
    pub consecutive_failures: u32,
    /// リクエスト受付ゲート（falseのワーカーはディスパッチ対象外）
    pub accepting_requests: bool,
    /// スポーン時刻
    pub started_at: DateTime<Utc>,
    /// 直近のプローブ成功時刻（成功するまでNone）
    pub last_healthy_at: Option<DateTime<Utc>>,
    /// 登録順（ラウンドロビンの順序付けに使用）
    pub(crate) seq: u64,
}

impl WorkerHandle {
    /// ディスパッチ対象か（Healthyかつ受付中）
    pub fn is_selectable(&self) -> bool {
        self.state == WorkerState::Healthy && self.accepting_requests
    }

    /// 状態スナップショットを返す
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            port: self.port,
            state: self.state,
            request_count: self.request_count,
            consecutive_failures: self.consecutive_failures,
            accepting_requests: self.accepting_requests,
            uptime_ms: millis_since(self.started_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_state_as_str() {
        assert_eq!(WorkerState::Starting.as_str(), "starting");
        assert_eq!(WorkerState::Healthy.as_str(), "healthy");
        assert_eq!(WorkerState::Unhealthy.as_str(), "unhealthy");
        assert_eq!(WorkerState::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_worker_state_serialization() {
        let json = serde_json::to_string(&WorkerState::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");

        let state: WorkerState = serde_json::from_str("\"unhealthy\"").unwrap();
        assert_eq!(state, WorkerState::Unhealthy);
    }
}
