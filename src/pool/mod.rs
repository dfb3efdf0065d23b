//! ワーカープール管理
//!
//! ワーカーレジストリ・ラウンドロビンカーソル・バックオフテーブルを
//! 所有し、2本の周期スイープ（ヘルス・監査）とスポーン/交代ポリシーを
//! 駆動する。
//!
//! ロック規約: レジストリ・カーソル・バックオフは単一の `RwLock` で守る。
//! HTTP呼び出し（プローブ・プロキシ）とプロセスI/Oは必ずロックを離して
//! から行う。

pub mod backoff;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::{PoolError, PoolResult};
use crate::common::types::PoolStatus;
use crate::config::PoolConfig;
use crate::health::HealthProber;
use crate::worker::{driver, WorkerHandle, WorkerState};

use backoff::BackoffTable;

/// 連続プローブ失敗がこの回数に達したワーカーは交代する
pub(crate) const HEALTH_MAX_FAILURES: u32 = 3;

/// プールのタイマー・タイムアウト設定
///
/// 本番値は固定（`Default`）。テストは [`WorkerPool::with_tuning`] で
/// 時計を圧縮できる。
#[derive(Debug, Clone)]
pub struct PoolTuning {
    /// ヘルススイープ周期
    pub health_interval: Duration,
    /// プローブ1回のタイムアウト
    pub health_timeout: Duration,
    /// 監査スイープ周期
    pub audit_interval: Duration,
    /// Starting→Healthyの起動デッドライン
    pub startup_timeout: Duration,
    /// 起動中のプローブ間隔
    pub startup_poll_interval: Duration,
    /// スポーンバックオフの基準時間
    pub base_backoff: Duration,
    /// graceful停止時のドレイン時間
    pub graceful_drain: Duration,
    /// ローテーション前のドレイン時間
    pub rotation_drain: Duration,
    /// プロキシリクエストのタイムアウト
    pub request_timeout: Duration,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_millis(5000),
            health_timeout: Duration::from_millis(2000),
            audit_interval: Duration::from_millis(30_000),
            startup_timeout: Duration::from_millis(30_000),
            startup_poll_interval: Duration::from_millis(200),
            base_backoff: Duration::from_millis(5000),
            graceful_drain: Duration::from_millis(2000),
            rotation_drain: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(120_000),
        }
    }
}

/// ディスパッチで選ばれたワーカーのスナップショット
#[derive(Debug, Clone)]
pub struct SelectedWorker {
    /// ワーカーID
    pub id: Uuid,
    /// リッスンポート
    pub port: u16,
    /// ベースURL
    pub base_url: String,
}

struct PoolInner {
    workers: HashMap<Uuid, WorkerHandle>,
    cursor: usize,
    next_seq: u64,
    backoff: BackoffTable,
}

/// ワーカープール
///
/// Cloneはプール本体を共有する（`Arc`ベース）。`init` でワーカーを
/// 順次起動してスイープを起動し、`dispose` で全体を畳む。
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<RwLock<PoolInner>>,
    prober: HealthProber,
    proxy_client: reqwest::Client,
    config: PoolConfig,
    tuning: Arc<PoolTuning>,
    sweeps: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// 本番設定でプールを作成（タイマーは仕様値）
    pub fn new(config: PoolConfig) -> Self {
        Self::with_tuning(config, PoolTuning::default())
    }

    /// タイマー設定を差し替えてプールを作成
    pub fn with_tuning(config: PoolConfig, tuning: PoolTuning) -> Self {
        let prober = HealthProber::new(tuning.health_timeout);
        let proxy_client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        Self {
            inner: Arc::new(RwLock::new(PoolInner {
                workers: HashMap::new(),
                cursor: 0,
                next_seq: 0,
                backoff: BackoffTable::new(tuning.base_backoff),
            })),
            prober,
            proxy_client,
            config,
            tuning: Arc::new(tuning),
            sweeps: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// プロキシ経路が使う共有HTTPクライアント
    pub(crate) fn proxy_client(&self) -> &reqwest::Client {
        &self.proxy_client
    }

    /// プロキシリクエストのタイムアウト
    pub(crate) fn request_timeout(&self) -> Duration {
        self.tuning.request_timeout
    }

    /// プール設定
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// プールを初期化する
    ///
    /// 設定ポート範囲のワーカーを順次起動し（各ワーカーの起動ヘルス
    /// 確定を待ってから次へ進む）、その後ヘルス・監査スイープを起動する。
    pub async fn init(&self) -> PoolResult<()> {
        if self.config.server_cmd.trim().is_empty() {
            return Err(PoolError::ConfigMissing);
        }

        info!(
            pool_size = self.config.pool_size,
            starting_port = self.config.starting_port,
            "Initializing worker pool"
        );

        for port in self.config.ports() {
            self.spawn_worker(port).await;
        }

        let healthy = {
            let inner = self.inner.read().await;
            inner
                .workers
                .values()
                .filter(|w| w.state == WorkerState::Healthy)
                .count()
        };
        info!(
            healthy,
            pool_size = self.config.pool_size,
            "Worker pool initialized"
        );

        let health = self.spawn_health_sweep();
        let audit = self.spawn_audit_sweep();
        let mut sweeps = self.sweeps.lock().expect("sweep handle lock poisoned");
        sweeps.push(health);
        sweeps.push(audit);

        Ok(())
    }

    /// ワーカーを1体スポーンする（生成の唯一の入口）
    ///
    /// バックオフゲートを通過したらプロセスを起動してレジストリに登録し、
    /// 起動ヘルスを待つ。失敗はバックオフに計上され、ハンドルは残らない。
    /// 健康なワーカーが登録されたときtrueを返す。
    pub(crate) async fn spawn_worker(&self, port: u16) -> bool {
        {
            let mut inner = self.inner.write().await;
            if !inner.backoff.try_begin_attempt(port, Instant::now()) {
                debug!(port, "Spawn attempt suppressed by backoff");
                return false;
            }
        }

        let mut worker = match driver::spawn(&self.config, port) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(port, error = %e, "Failed to spawn worker");
                let mut inner = self.inner.write().await;
                inner.backoff.record_failure(port, Instant::now());
                return false;
            }
        };

        let id = worker.id;
        let base_url = worker.base_url.clone();

        {
            let mut inner = self.inner.write().await;
            worker.seq = inner.next_seq;
            inner.next_seq += 1;
            inner.workers.insert(id, worker);
        }

        if self.wait_for_healthy(id, &base_url).await {
            let mut inner = self.inner.write().await;
            inner.backoff.record_success(port);
            info!(worker_id = %id, port, "Worker is healthy");
            true
        } else {
            warn!(
                worker_id = %id,
                port,
                timeout_ms = self.tuning.startup_timeout.as_millis() as u64,
                "Worker failed to become healthy before startup deadline"
            );
            let removed = {
                let mut inner = self.inner.write().await;
                inner.backoff.record_failure(port, Instant::now());
                inner.workers.remove(&id)
            };
            if let Some(worker) = removed {
                let _ = driver::terminate(worker, false, self.tuning.graceful_drain);
            }
            false
        }
    }

    /// 起動ヘルスを待つ
    ///
    /// デッドラインまで一定間隔でプローブし、最初の成功でHealthyに
    /// 遷移させる。
    async fn wait_for_healthy(&self, id: Uuid, base_url: &str) -> bool {
        let deadline = Instant::now() + self.tuning.startup_timeout;

        loop {
            if self.prober.probe(base_url, true).await {
                let mut inner = self.inner.write().await;
                let Some(worker) = inner.workers.get_mut(&id) else {
                    // 待機中にdispose/交代で外された
                    return false;
                };
                worker.state = WorkerState::Healthy;
                worker.consecutive_failures = 0;
                worker.last_healthy_at = Some(Utc::now());
                return true;
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.tuning.startup_poll_interval).await;
        }
    }

    /// ヘルススイープを起動する
    ///
    /// 各tickでワーカーごとのプローブタスクを投げ放す。個々のプローブの
    /// 完了は待たないため、遅いプローブが次のスイープを塞ぐことはない。
    fn spawn_health_sweep(&self) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(pool.tuning.health_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                let targets: Vec<(Uuid, String)> = {
                    let inner = pool.inner.read().await;
                    inner
                        .workers
                        .values()
                        .map(|w| (w.id, w.base_url.clone()))
                        .collect()
                };

                for (id, base_url) in targets {
                    let pool = pool.clone();
                    tokio::spawn(async move {
                        let healthy = pool.prober.probe(&base_url, false).await;
                        pool.on_probe_result(id, healthy).await;
                    });
                }
            }
        })
    }

    /// プローブ結果をワーカー状態へ反映する
    ///
    /// 成功はカウンタをリセットしてHealthyへ。失敗は連続失敗を加算し、
    /// 閾値到達で交代を起動する。重複観測に対して冪等。
    pub(crate) async fn on_probe_result(&self, id: Uuid, healthy: bool) {
        let replace = {
            let mut inner = self.inner.write().await;
            let Some(worker) = inner.workers.get_mut(&id) else {
                return;
            };

            if healthy {
                if worker.consecutive_failures > 0 {
                    info!(
                        worker_id = %id,
                        port = worker.port,
                        failures = worker.consecutive_failures,
                        "Worker recovered"
                    );
                }
                worker.consecutive_failures = 0;
                worker.last_healthy_at = Some(Utc::now());
                if worker.state != WorkerState::Healthy {
                    worker.state = WorkerState::Healthy;
                }
                false
            } else {
                worker.consecutive_failures += 1;
                let failures = worker.consecutive_failures;
                if failures >= HEALTH_MAX_FAILURES {
                    true
                } else {
                    if failures == HEALTH_MAX_FAILURES - 1 {
                        warn!(
                            worker_id = %id,
                            port = worker.port,
                            failures,
                            "Worker is one failed probe away from replacement"
                        );
                    }
                    false
                }
            }
        };

        if replace {
            self.replace_worker(id).await;
        }
    }

    /// ワーカーを交代させる
    ///
    /// 旧ハンドルを即座にレジストリから外し（同一ポートのハンドルが
    /// 二重登録される窓を作らない）、代替のスポーン完了後に旧プロセスを
    /// gracefulに停止する。代替が即死した場合に備えて旧プロセスは
    /// スポーン中も走らせたままにする。既に外れていれば何もしない。
    pub(crate) async fn replace_worker(&self, id: Uuid) {
        let old = {
            let mut inner = self.inner.write().await;
            inner.workers.remove(&id)
        };

        let Some(mut old) = old else {
            debug!(worker_id = %id, "Replacement already in progress; skipping");
            return;
        };

        old.state = WorkerState::Unhealthy;
        old.accepting_requests = false;
        let port = old.port;

        info!(worker_id = %id, port, "Replacing worker");

        self.spawn_worker(port).await;

        let _ = driver::terminate(old, true, self.tuning.graceful_drain);
    }

    /// 監査スイープを起動する
    fn spawn_audit_sweep(&self) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(pool.tuning.audit_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                pool.audit().await;
            }
        })
    }

    /// 監査を1回実行する
    ///
    /// 死んだプロセスの回収・空プールの復旧・低水位の警告。
    pub(crate) async fn audit(&self) {
        // 死亡プロセスの回収（予期しない子プロセス死の唯一の再スポーン経路）
        let dead: Vec<(Uuid, u16)> = {
            let mut inner = self.inner.write().await;
            let mut dead_ids = Vec::new();
            for worker in inner.workers.values_mut() {
                if !driver::is_alive(worker) {
                    dead_ids.push(worker.id);
                }
            }

            dead_ids
                .into_iter()
                .filter_map(|id| inner.workers.remove(&id).map(|w| (w.id, w.port)))
                .collect()
        };

        for (id, port) in dead {
            warn!(worker_id = %id, port, "Worker process died unexpectedly; respawning");
            self.spawn_worker(port).await;
        }

        // プール全滅からの復旧
        let empty = {
            let inner = self.inner.read().await;
            inner.workers.is_empty()
        };
        if empty {
            warn!("Worker registry is empty; recovering pool");
            self.recover_pool().await;
        }

        // 低水位の警告（行動はしない）
        let healthy = {
            let inner = self.inner.read().await;
            inner
                .workers
                .values()
                .filter(|w| w.state == WorkerState::Healthy)
                .count()
        };
        if healthy < self.config.pool_size / 2 {
            warn!(
                healthy,
                pool_size = self.config.pool_size,
                "Healthy worker count is below half of pool size"
            );
        }
    }

    /// 設定ポート範囲のうちワーカーが居ないポートを順に埋める
    async fn recover_pool(&self) {
        for port in self.config.ports() {
            let occupied = {
                let inner = self.inner.read().await;
                inner.workers.values().any(|w| w.port == port)
            };
            if !occupied {
                self.spawn_worker(port).await;
            }
        }
    }

    /// ラウンドロビンでワーカーを選ぶ
    ///
    /// 選択可能集合（Healthyかつ受付中、登録順）は呼び出しごとに再構築し、
    /// カーソルだけが呼び出し間に持ち越される。空ならNone。
    pub async fn select_worker(&self) -> Option<SelectedWorker> {
        let mut inner = self.inner.write().await;

        let mut selectable: Vec<(u64, Uuid)> = inner
            .workers
            .values()
            .filter(|w| w.is_selectable())
            .map(|w| (w.seq, w.id))
            .collect();

        if selectable.is_empty() {
            return None;
        }
        selectable.sort_by_key(|(seq, _)| *seq);

        let index = inner.cursor % selectable.len();
        inner.cursor = (inner.cursor + 1) % selectable.len();

        let id = selectable[index].1;
        let worker = inner
            .workers
            .get(&id)
            .expect("selectable worker must be registered");

        Some(SelectedWorker {
            id: worker.id,
            port: worker.port,
            base_url: worker.base_url.clone(),
        })
    }

    /// ディスパッチをワーカーのカウンタに計上する
    pub(crate) async fn record_dispatch(&self, id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(worker) = inner.workers.get_mut(&id) {
            worker.request_count += 1;
        }
    }

    /// プロキシ失敗をワーカーの連続失敗に計上する
    ///
    /// 交代判定は行わない（次のヘルススイープの観測に委ねる）。
    pub(crate) async fn penalize_worker(&self, id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(worker) = inner.workers.get_mut(&id) {
            worker.consecutive_failures += 1;
            debug!(
                worker_id = %id,
                failures = worker.consecutive_failures,
                "Recorded proxy failure against worker"
            );
        }
    }

    /// ローテーション閾値を検査し、必要なら交代を予約する
    ///
    /// 閾値到達で受付を即時停止し、ドレイン時間の後に交代する。
    /// 受付停止済みのワーカーには再予約しない。
    pub(crate) async fn maybe_rotate(&self, id: Uuid) {
        let rotate = {
            let mut inner = self.inner.write().await;
            match inner.workers.get_mut(&id) {
                Some(worker)
                    if worker.accepting_requests
                        && worker.request_count >= self.config.rotate_threshold =>
                {
                    worker.accepting_requests = false;
                    info!(
                        worker_id = %id,
                        port = worker.port,
                        request_count = worker.request_count,
                        "Worker reached rotation threshold; draining"
                    );
                    true
                }
                _ => false,
            }
        };

        if rotate {
            let pool = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(pool.tuning.rotation_drain).await;
                pool.replace_worker(id).await;
            });
        }
    }

    /// プール状態のスナップショットを返す
    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.read().await;

        let mut workers: Vec<&WorkerHandle> = inner.workers.values().collect();
        workers.sort_by_key(|w| w.seq);

        let snapshots: Vec<_> = workers.iter().map(|w| w.snapshot()).collect();
        let healthy = workers
            .iter()
            .filter(|w| w.state == WorkerState::Healthy)
            .count();

        PoolStatus {
            total_workers: snapshots.len(),
            healthy_workers: healthy,
            workers: snapshots,
        }
    }

    /// プールを破棄する
    ///
    /// スイープを止めてから全ワーカーをgracefulに停止し、レジストリを
    /// 空にする。冪等（2回目以降は何もしない）。
    pub async fn dispose(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut sweeps = self.sweeps.lock().expect("sweep handle lock poisoned");
            sweeps.drain(..).collect()
        };
        for handle in &handles {
            handle.abort();
        }

        let workers: Vec<WorkerHandle> = {
            let mut inner = self.inner.write().await;
            inner.cursor = 0;
            inner.workers.drain().map(|(_, w)| w).collect()
        };

        if workers.is_empty() {
            return;
        }

        info!(count = workers.len(), "Disposing worker pool");

        let kills: Vec<JoinHandle<()>> = workers
            .into_iter()
            .map(|w| driver::terminate(w, true, self.tuning.graceful_drain))
            .collect();
        futures::future::join_all(kills).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn test_config(cmd: &str) -> PoolConfig {
        PoolConfig {
            server_cmd: cmd.to_string(),
            pool_size: 2,
            rotate_threshold: 3,
            starting_port: 29000,
            log_dir: std::env::temp_dir()
                .join("whisperlb-pool-test")
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        }
    }

    fn fast_tuning() -> PoolTuning {
        PoolTuning {
            health_interval: Duration::from_millis(100),
            health_timeout: Duration::from_millis(200),
            audit_interval: Duration::from_millis(200),
            startup_timeout: Duration::from_millis(300),
            startup_poll_interval: Duration::from_millis(50),
            base_backoff: Duration::from_millis(100),
            graceful_drain: Duration::from_millis(50),
            rotation_drain: Duration::from_millis(50),
            request_timeout: Duration::from_millis(1000),
        }
    }

    /// 生きたダミープロセス付きのワーカーをレジストリへ直接挿入する
    async fn insert_worker(pool: &WorkerPool, port: u16, state: WorkerState) -> Uuid {
        let process = Command::new("sleep")
            .arg("300")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn dummy process");

        let mut worker = WorkerHandle {
            id: Uuid::new_v4(),
            port,
            base_url: format!("http://127.0.0.1:{port}"),
            process,
            state,
            request_count: 0,
            consecutive_failures: 0,
            accepting_requests: true,
            started_at: Utc::now(),
            last_healthy_at: None,
            seq: 0,
        };

        let mut inner = pool.inner.write().await;
        worker.seq = inner.next_seq;
        inner.next_seq += 1;
        let id = worker.id;
        inner.workers.insert(id, worker);
        id
    }

    fn pool_with_bad_cmd() -> WorkerPool {
        WorkerPool::with_tuning(test_config("/nonexistent/whisper-server"), fast_tuning())
    }

    #[tokio::test]
    async fn test_init_requires_server_cmd() {
        let pool = WorkerPool::with_tuning(test_config(""), fast_tuning());
        let result = pool.init().await;
        assert!(matches!(result, Err(PoolError::ConfigMissing)));
    }

    #[tokio::test]
    async fn test_select_worker_round_robin() {
        let pool = pool_with_bad_cmd();
        let a = insert_worker(&pool, 29000, WorkerState::Healthy).await;
        let b = insert_worker(&pool, 29001, WorkerState::Healthy).await;
        let c = insert_worker(&pool, 29002, WorkerState::Healthy).await;

        let picks: Vec<Uuid> = [
            pool.select_worker().await.unwrap().id,
            pool.select_worker().await.unwrap().id,
            pool.select_worker().await.unwrap().id,
            pool.select_worker().await.unwrap().id,
        ]
        .to_vec();

        // 登録順に一巡して先頭へ戻る
        assert_eq!(picks, vec![a, b, c, a]);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_select_worker_skips_non_selectable() {
        let pool = pool_with_bad_cmd();
        let a = insert_worker(&pool, 29000, WorkerState::Healthy).await;
        let b = insert_worker(&pool, 29001, WorkerState::Unhealthy).await;
        let c = insert_worker(&pool, 29002, WorkerState::Healthy).await;

        {
            let mut inner = pool.inner.write().await;
            // 受付停止中のHealthyワーカーも対象外
            inner.workers.get_mut(&c).unwrap().accepting_requests = false;
        }

        let first = pool.select_worker().await.unwrap().id;
        let second = pool.select_worker().await.unwrap().id;
        assert_eq!(first, a);
        assert_eq!(second, a);
        assert_ne!(first, b);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_select_worker_empty_pool_returns_none() {
        let pool = pool_with_bad_cmd();
        assert!(pool.select_worker().await.is_none());
    }

    #[tokio::test]
    async fn test_flapping_worker_recovers() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        // 2回失敗しても交代しない
        pool.on_probe_result(id, false).await;
        pool.on_probe_result(id, false).await;
        {
            let inner = pool.inner.read().await;
            let worker = inner.workers.get(&id).unwrap();
            assert_eq!(worker.consecutive_failures, 2);
            assert_eq!(worker.state, WorkerState::Healthy);
        }

        // 成功でリセット
        pool.on_probe_result(id, true).await;
        {
            let inner = pool.inner.read().await;
            let worker = inner.workers.get(&id).unwrap();
            assert_eq!(worker.consecutive_failures, 0);
            assert!(worker.last_healthy_at.is_some());
        }

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_three_failures_trigger_replacement() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        pool.on_probe_result(id, false).await;
        pool.on_probe_result(id, false).await;
        // 3回目で交代（代替スポーンは失敗するが、旧ワーカーは外れる）
        pool.on_probe_result(id, false).await;

        let inner = pool.inner.read().await;
        assert!(!inner.workers.contains_key(&id));
        drop(inner);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_probe_success_promotes_starting_worker() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Starting).await;

        pool.on_probe_result(id, true).await;

        let inner = pool.inner.read().await;
        assert_eq!(inner.workers.get(&id).unwrap().state, WorkerState::Healthy);
        drop(inner);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_probe_result_for_unknown_worker_is_noop() {
        let pool = pool_with_bad_cmd();
        // パニックせず何もしない
        pool.on_probe_result(Uuid::new_v4(), false).await;
        pool.on_probe_result(Uuid::new_v4(), true).await;
    }

    #[tokio::test]
    async fn test_replace_worker_is_guarded_against_double_call() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        pool.replace_worker(id).await;
        // 2回目はハンドルが既に無いので何もしない
        pool.replace_worker(id).await;

        let inner = pool.inner.read().await;
        assert!(!inner.workers.contains_key(&id));
        drop(inner);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_rotation_threshold_stops_accepting() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        pool.record_dispatch(id).await;
        pool.record_dispatch(id).await;
        pool.maybe_rotate(id).await;
        {
            let inner = pool.inner.read().await;
            assert!(inner.workers.get(&id).unwrap().accepting_requests);
        }

        // 閾値(3)到達で受付停止
        pool.record_dispatch(id).await;
        pool.maybe_rotate(id).await;
        {
            let inner = pool.inner.read().await;
            assert!(!inner.workers.get(&id).unwrap().accepting_requests);
        }

        // ドレイン後に交代が走り、旧ワーカーは消える
        tokio::time::sleep(Duration::from_millis(300)).await;
        {
            let inner = pool.inner.read().await;
            assert!(!inner.workers.contains_key(&id));
        }

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_audit_respawns_dead_process() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        // プロセスを殺して監査を回す
        {
            let mut inner = pool.inner.write().await;
            let worker = inner.workers.get_mut(&id).unwrap();
            let _ = worker.process.start_kill();
            let _ = worker.process.wait().await;
        }
        pool.audit().await;

        // 死んだワーカーは外れ、再スポーンは失敗してバックオフに計上される
        let inner = pool.inner.read().await;
        assert!(!inner.workers.contains_key(&id));
        assert_eq!(inner.backoff.failure_count(29000), 1);
        drop(inner);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_penalize_worker_increments_failures() {
        let pool = pool_with_bad_cmd();
        let id = insert_worker(&pool, 29000, WorkerState::Healthy).await;

        pool.penalize_worker(id).await;
        let inner = pool.inner.read().await;
        assert_eq!(inner.workers.get(&id).unwrap().consecutive_failures, 1);
        drop(inner);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let pool = pool_with_bad_cmd();
        let a = insert_worker(&pool, 29000, WorkerState::Healthy).await;
        insert_worker(&pool, 29001, WorkerState::Starting).await;

        pool.record_dispatch(a).await;

        let status = pool.status().await;
        assert_eq!(status.total_workers, 2);
        assert_eq!(status.healthy_workers, 1);
        assert_eq!(status.workers[0].id, a);
        assert_eq!(status.workers[0].request_count, 1);

        pool.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let pool = pool_with_bad_cmd();
        insert_worker(&pool, 29000, WorkerState::Healthy).await;

        pool.dispose().await;
        assert_eq!(pool.status().await.total_workers, 0);

        // 2回目は何もしない
        pool.dispose().await;
        assert_eq!(pool.status().await.total_workers, 0);
    }
}
