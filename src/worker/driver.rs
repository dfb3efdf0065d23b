//! ワーカープロセスドライバ
//!
//! whisper-serverの起動（引数構築・標準出力のファイル捕捉）、停止、
//! 生存確認を担う。レジストリの管理は行わない。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::{PoolError, PoolResult};
use crate::config::PoolConfig;
use crate::worker::{WorkerHandle, WorkerState};

/// 起動コマンド文字列を実行ファイルと先行引数に分解する
///
/// 空白区切り。先頭トークンが実行ファイル、残りは計算引数より前に並ぶ。
pub(crate) fn split_command(cmd: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = cmd.split_whitespace().map(str::to_string);
    let program = tokens.next()?;
    Some((program, tokens.collect()))
}

/// ワーカー用の引数ベクトルを構築する
///
/// `--port` は常に付与。`--model` はモデルパスが非空のとき、
/// `--threads` はスレッド数が正のときのみ付与し、最後に追加引数を
/// 空白区切りで展開する。
pub fn build_args(config: &PoolConfig, port: u16) -> Vec<String> {
    let mut args = vec!["--port".to_string(), port.to_string()];

    if !config.server_model.is_empty() {
        args.push("--model".to_string());
        args.push(config.server_model.clone());
    }

    if config.server_threads > 0 {
        args.push("--threads".to_string());
        args.push(config.server_threads.to_string());
    }

    args.extend(config.server_args.split_whitespace().map(str::to_string));

    args
}

fn open_log_sink(config: &PoolConfig, port: u16) -> PoolResult<std::fs::File> {
    let dir = PathBuf::from(&config.log_dir);
    std::fs::create_dir_all(&dir)
        .map_err(|e| PoolError::SpawnFailed(format!("failed to create log dir: {e}")))?;

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("worker-{port}.log")))
        .map_err(|e| PoolError::SpawnFailed(format!("failed to open worker log: {e}")))
}

/// 設定されたコマンドでワーカーを起動し、Starting状態のハンドルを返す
///
/// 標準出力・標準エラーは `<log_dir>/worker-<port>.log` に追記で捕捉する。
pub fn spawn(config: &PoolConfig, port: u16) -> PoolResult<WorkerHandle> {
    let (program, mut args) =
        split_command(&config.server_cmd).ok_or(PoolError::ConfigMissing)?;
    args.extend(build_args(config, port));

    let log = open_log_sink(config, port)?;
    let log_err = log
        .try_clone()
        .map_err(|e| PoolError::SpawnFailed(format!("failed to clone log handle: {e}")))?;

    let mut command = Command::new(&program);
    command
        .args(&args)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);

    if !config.server_cwd.is_empty() {
        command.current_dir(&config.server_cwd);
    }

    let process = command
        .spawn()
        .map_err(|e| PoolError::SpawnFailed(format!("{program}: {e}")))?;

    info!(port, pid = process.id(), "Spawned whisper-server worker");

    Ok(WorkerHandle {
        id: Uuid::new_v4(),
        port,
        base_url: format!("http://127.0.0.1:{port}"),
        process,
        state: WorkerState::Starting,
        request_count: 0,
        consecutive_failures: 0,
        accepting_requests: true,
        started_at: Utc::now(),
        last_healthy_at: None,
        seq: 0,
    })
}

/// ワーカーを停止する
///
/// gracefulのときは受付を止めてから `drain` 待ってkillし、処理中の
/// リクエストを逃がす。非gracefulは即時kill。状態は同期的にStoppedへ
/// 遷移する。kill失敗はログに残すのみで伝播しない。
pub fn terminate(
    mut worker: WorkerHandle,
    graceful: bool,
    drain: Duration,
) -> tokio::task::JoinHandle<()> {
    worker.accepting_requests = false;
    worker.state = WorkerState::Stopped;

    let id = worker.id;
    let port = worker.port;

    tokio::spawn(async move {
        if graceful {
            tokio::time::sleep(drain).await;
        }
        match worker.process.kill().await {
            Ok(()) => debug!(worker_id = %id, port, graceful, "Worker process killed"),
            Err(e) => warn!(
                worker_id = %id,
                port,
                error = %e,
                "Failed to kill worker process"
            ),
        }
    })
}

/// OSプロセスが終了コードを報告していなければ生存とみなす
pub fn is_alive(worker: &mut WorkerHandle) -> bool {
    match worker.process.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            debug!(worker_id = %worker.id, port = worker.port, %status, "Worker process has exited");
            false
        }
        // 判定不能時は生存側に倒す（次回の監査で再評価される）
        Err(_) => true,
    }
}
