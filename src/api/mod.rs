//! REST APIハンドラー
//!
//! 外向きHTTPコントラクト:
//! - `GET  /health`: サービス自体の生存とプール概況
//! - `GET  /api/v1/providers`: 利用可能なプロバイダ一覧
//! - `POST /api/v1/transcriptions`: 転写リクエスト
//! - `GET  /api/v1/status`: プール状態

pub mod error;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::common::types::{PoolStatus, TranscriptionRequest, TranscriptionResult};
use crate::proxy;
use crate::AppState;

use error::AppError;

/// APIルーターを構築する
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/providers", get(providers))
        .route("/api/v1/transcriptions", post(transcriptions))
        .route("/api/v1/status", get(status))
        .with_state(state)
}

/// GET /health
///
/// プールが全滅していても200を返す（プール自体が自己修復する）。
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.pool.status().await;

    Json(json!({
        "status": "ok",
        "healthy_workers": status.healthy_workers,
        "total_workers": status.total_workers,
    }))
}

/// GET /api/v1/providers
async fn providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.pool.status().await;

    Json(json!({
        "providers": [{
            "name": "whisper-server",
            "available": status.healthy_workers > 0,
        }]
    }))
}

/// POST /api/v1/transcriptions
async fn transcriptions(
    State(state): State<AppState>,
    Json(request): Json<TranscriptionRequest>,
) -> Result<Json<TranscriptionResult>, AppError> {
    let result = proxy::transcribe(&state.pool, request).await?;
    Ok(Json(result))
}

/// GET /api/v1/status
async fn status(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.pool.status().await)
}
