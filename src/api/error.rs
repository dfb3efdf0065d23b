//! APIエラーレスポンス型
//!
//! axum用の共通エラーハンドリング

use axum::{response::IntoResponse, Json};
use serde_json::json;

use crate::common::error::PoolError;

/// Axum用のエラーレスポンス型
#[derive(Debug)]
pub struct AppError(pub PoolError);

impl From<PoolError> for AppError {
    fn from(error: PoolError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();

        // 上流のステータスと本文はそのまま呼び出し元に開示する
        (
            status,
            Json(json!({
                "error": {
                    "message": self.0.to_string(),
                    "code": status.as_u16(),
                }
            })),
        )
            .into_response()
    }
}
