//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! プローブやライフサイクルの失敗はカウンタ・状態にのみ反映され、
//! 利用者に見えるエラーはプロキシ経路とワーカー選択からのみ発生する。

use axum::http::StatusCode;
use thiserror::Error;

/// ワーカープールのエラー型
#[derive(Debug, Error)]
pub enum PoolError {
    /// whisper-server command is not configured
    #[error("whisper_server.cmd is empty; set WHISPERLB_SERVER_CMD")]
    ConfigMissing,

    /// OS-level spawn failure
    #[error("Failed to spawn whisper-server: {0}")]
    SpawnFailed(String),

    /// No selectable worker at dispatch time
    #[error("No healthy workers available")]
    NoHealthyWorkers,

    /// Caller supplied audio that could not be decoded
    #[error("Invalid audio payload: {0}")]
    InvalidAudio(String),

    /// Upstream worker answered with a non-2xx status
    #[error("Inference request failed with status {status}: {body}")]
    Upstream {
        /// HTTP status returned by the worker
        status: u16,
        /// Response body text
        body: String,
    },

    /// Upstream request hit the hard proxy timeout
    #[error("Inference request timed out after {0} ms")]
    UpstreamTimeout(u64),

    /// Transport-level failure talking to the worker
    #[error("Failed to reach worker: {0}")]
    UpstreamTransport(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigMissing => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoHealthyWorkers => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidAudio(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias
pub type PoolResult<T> = Result<T, PoolError>;
