//! スポーン失敗の指数バックオフ
//!
//! ポート単位で失敗回数と最終試行時刻を記録し、閾値を超えたポートの
//! 再スポーン頻度を抑える。レコードはスポーン経路からのみ更新され、
//! 最初の成功で削除される。

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// この回数までは即時リトライ、超えたらバックオフ窓が開く
pub(crate) const MAX_SPAWN_FAILURES: u32 = 5;

/// 指数の上限（`base * 2^16` で頭打ち）
const MAX_BACKOFF_SHIFT: u32 = 16;

/// ポート1つ分のバックオフレコード
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackoffRecord {
    /// 連続失敗回数
    pub count: u32,
    /// 最終試行時刻
    pub last_attempt: Instant,
}

/// ポート別バックオフテーブル
///
/// 時刻は引数で受け取る（テストから合成タイムラインを流し込める）。
#[derive(Debug)]
pub(crate) struct BackoffTable {
    base: Duration,
    records: HashMap<u16, BackoffRecord>,
}

impl BackoffTable {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            records: HashMap::new(),
        }
    }

    /// 失敗 `count` 回のポートに課されるバックオフ時間
    ///
    /// 閾値未満ならNone（ゲートなし）。
    pub fn delay_for(&self, count: u32) -> Option<Duration> {
        if count < MAX_SPAWN_FAILURES {
            return None;
        }
        let shift = (count - MAX_SPAWN_FAILURES).min(MAX_BACKOFF_SHIFT);
        Some(self.base * (1u32 << shift))
    }

    /// スポーン試行を開始してよいか判定する
    ///
    /// バックオフ窓の内側ならfalse（レコードは変更しない）。
    /// 進行する場合はレコードの `last_attempt` を更新してからtrueを返す。
    /// 同じ窓の間に再入したスポーンも更新後の時刻を見る。
    pub fn try_begin_attempt(&mut self, port: u16, now: Instant) -> bool {
        let Some(&BackoffRecord { count, last_attempt }) = self.records.get(&port) else {
            return true;
        };

        if let Some(backoff) = self.delay_for(count) {
            if now.duration_since(last_attempt) < backoff {
                return false;
            }
        }

        self.records.get_mut(&port).unwrap().last_attempt = now;
        true
    }

    /// スポーン失敗を記録する（初回失敗でレコードを作成）
    pub fn record_failure(&mut self, port: u16, now: Instant) {
        let record = self.records.entry(port).or_insert(BackoffRecord {
            count: 0,
            last_attempt: now,
        });
        record.count += 1;
    }

    /// スポーン成功でレコードを削除する
    pub fn record_success(&mut self, port: u16) {
        self.records.remove(&port);
    }

    /// 現在の失敗回数（レコードが無ければ0）
    #[cfg(test)]
    pub fn failure_count(&self, port: u16) -> u32 {
        self.records.get(&port).map(|r| r.count).unwrap_or(0)
    }
}
