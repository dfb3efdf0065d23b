//! 推論リクエストのプロキシ経路
//!
//! ワーカーを選び、音声をmultipartで `/inference` へ転送し、
//! 寛容デコードで正規形の転写結果に変換する。失敗したリクエストを
//! 別ワーカーで再試行することはない（失敗はワーカーの失敗カウンタに
//! 計上し、呼び出し元へそのまま返す）。

use base64::Engine;
use tracing::{debug, info};

use crate::common::error::{PoolError, PoolResult};
use crate::common::types::{InferenceResponse, TranscriptionRequest, TranscriptionResult};
use crate::pool::WorkerPool;

/// base64音声入力を正規化してデコードする
///
/// 空白類をすべて除去し、`data:<mime>;base64,` プレフィックスが
/// あれば取り除いてからデコードする。
pub fn decode_audio(input: &str) -> PoolResult<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    let payload = match cleaned.split_once(',') {
        Some((head, rest)) if head.starts_with("data:") && head.ends_with(";base64") => rest,
        _ => cleaned.as_str(),
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| PoolError::InvalidAudio(e.to_string()))
}

/// 転写リクエストを1体のワーカーへプロキシする
///
/// 選択 → カウンタ加算 → 送信 → （成功時）ローテーション判定の順。
pub async fn transcribe(
    pool: &WorkerPool,
    request: TranscriptionRequest,
) -> PoolResult<TranscriptionResult> {
    let selected = pool
        .select_worker()
        .await
        .ok_or(PoolError::NoHealthyWorkers)?;
    pool.record_dispatch(selected.id).await;

    let audio = decode_audio(&request.audio)?;
    let language = request.language.unwrap_or_else(|| "en".to_string());

    debug!(
        worker_id = %selected.id,
        port = selected.port,
        audio_bytes = audio.len(),
        language = %language,
        "Dispatching transcription request"
    );

    let part = reqwest::multipart::Part::bytes(audio)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .expect("audio/wav is a valid MIME type");

    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("response_format", "json")
        .text("temperature", "0.0")
        .text("language", language.clone());

    let url = format!("{}/inference", selected.base_url);
    let response = match pool
        .proxy_client()
        .post(&url)
        .multipart(form)
        .timeout(pool.request_timeout())
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            pool.penalize_worker(selected.id).await;
            return Err(if e.is_timeout() {
                PoolError::UpstreamTimeout(pool.request_timeout().as_millis() as u64)
            } else {
                PoolError::UpstreamTransport(e.to_string())
            });
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        pool.penalize_worker(selected.id).await;
        return Err(PoolError::Upstream {
            status: status.as_u16(),
            body,
        });
    }

    let decoded: InferenceResponse = match response.json().await {
        Ok(decoded) => decoded,
        Err(e) => {
            pool.penalize_worker(selected.id).await;
            return Err(PoolError::UpstreamTransport(e.to_string()));
        }
    };

    let mut metadata = request.metadata;
    metadata.insert("worker_id".to_string(), selected.id.to_string());
    metadata.insert("worker_url".to_string(), selected.base_url.clone());

    let result = decoded.into_result(&language, metadata);

    info!(
        worker_id = %selected.id,
        port = selected.port,
        duration = result.duration,
        segments = result.segments.len(),
        "Transcription completed"
    );

    pool.maybe_rotate(selected.id).await;

    Ok(result)
}
