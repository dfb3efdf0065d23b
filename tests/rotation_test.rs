//! リクエスト数閾値によるワーカーローテーションのテスト

#[path = "support/mod.rs"]
mod support;

use std::collections::HashMap;
use std::time::Duration;

use serial_test::serial;
use whisperlb::common::types::TranscriptionRequest;
use whisperlb::pool::WorkerPool;
use whisperlb::proxy;
use whisperlb::worker::WorkerState;

use support::{alloc_ports, fast_tuning, sample_audio_b64, stub_config, wait_for_status};

fn request() -> TranscriptionRequest {
    TranscriptionRequest {
        audio: sample_audio_b64(),
        language: None,
        timestamps: true,
        metadata: HashMap::new(),
    }
}

#[tokio::test]
#[serial]
async fn worker_rotates_after_reaching_threshold() {
    let base = alloc_ports(1);
    let mut config = stub_config(base, 1, "");
    config.rotate_threshold = 3;

    let pool = WorkerPool::with_tuning(config, fast_tuning());
    pool.init().await.expect("init should succeed");

    let first_id = pool.status().await.workers[0].id;

    // 閾値までの転写はすべて成功し、同じワーカーが処理する
    for _ in 0..3 {
        proxy::transcribe(&pool, request())
            .await
            .expect("transcription");
    }

    // 3件目の成功直後に受付が止まる
    let status = pool.status().await;
    let rotating = status.workers.iter().find(|w| w.id == first_id);
    if let Some(worker) = rotating {
        assert!(!worker.accepting_requests);
        assert_eq!(worker.request_count, 3);
    }
    // （既に交代済みならそれはそれで良い）

    // ドレイン後、同じポートに新しいワーカーが立つ
    let status = wait_for_status(&pool, Duration::from_secs(10), |status| {
        status.workers.iter().any(|w| {
            w.id != first_id
                && w.port == base
                && w.state == WorkerState::Healthy
                && w.request_count == 0
        })
    })
    .await;
    assert_eq!(status.total_workers, 1);

    pool.dispose().await;
}
