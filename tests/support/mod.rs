//! 統合テスト用の共通ヘルパー
//!
//! whisper_stubバイナリを子プロセスとして使うプールを組み立てる。

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use whisperlb::common::types::PoolStatus;
use whisperlb::config::PoolConfig;
use whisperlb::pool::{PoolTuning, WorkerPool};

/// テスト間でポートが被らないように割り当てる
static NEXT_PORT: AtomicU16 = AtomicU16::new(39100);

/// 連続した `count` ポートのブロックを確保し、先頭を返す
pub fn alloc_ports(count: u16) -> u16 {
    NEXT_PORT.fetch_add(count, Ordering::SeqCst)
}

/// whisper_stubバイナリのパス
pub fn stub_cmd() -> String {
    env!("CARGO_BIN_EXE_whisper_stub").to_string()
}

/// whisper_stubを子プロセスにするプール設定
///
/// スタブの挙動フラグは `extra_args` で渡す。
pub fn stub_config(starting_port: u16, pool_size: usize, extra_args: &str) -> PoolConfig {
    PoolConfig {
        pool_size,
        rotate_threshold: 1000,
        starting_port,
        server_cmd: stub_cmd(),
        server_args: extra_args.to_string(),
        log_dir: std::env::temp_dir()
            .join("whisperlb-integration-tests")
            .to_string_lossy()
            .into_owned(),
        ..Default::default()
    }
}

/// テスト用に時計を圧縮したタイマー設定
pub fn fast_tuning() -> PoolTuning {
    PoolTuning {
        health_interval: Duration::from_millis(200),
        health_timeout: Duration::from_millis(500),
        audit_interval: Duration::from_millis(300),
        startup_timeout: Duration::from_millis(3000),
        startup_poll_interval: Duration::from_millis(50),
        base_backoff: Duration::from_millis(200),
        graceful_drain: Duration::from_millis(100),
        rotation_drain: Duration::from_millis(100),
        request_timeout: Duration::from_millis(5000),
    }
}

/// ヘルススイープを事実上止めたタイマー設定
///
/// プロキシ失敗カウンタの検証など、スイープによるリセットが
/// 入ると困るテストで使う。
pub fn no_sweep_tuning() -> PoolTuning {
    PoolTuning {
        health_interval: Duration::from_secs(600),
        audit_interval: Duration::from_secs(600),
        ..fast_tuning()
    }
}

/// 条件を満たすプール状態になるまでポーリングする
pub async fn wait_for_status<F>(pool: &WorkerPool, timeout: Duration, predicate: F) -> PoolStatus
where
    F: Fn(&PoolStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let status = pool.status().await;
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for pool status; last status: {:?}",
                status
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// 適当な有効base64音声ペイロード
pub fn sample_audio_b64() -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(b"RIFF....WAVEfmt fake audio bytes")
}
