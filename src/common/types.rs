//! 転写結果・プール状態の型定義
//!
//! whisper-serverの `/inference` レスポンスはフィールドの欠落や別綴り
//! （`text`/`transcript`）があるため、寛容なデコード型を経由して
//! 正規形の [`TranscriptionResult`] に変換する。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::WorkerState;

/// 正規化された転写結果のプロバイダ名
pub const PROVIDER_NAME: &str = "whisper-server";

/// 転写リクエスト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// base64エンコードされた音声データ
    /// （空白や `data:<mime>;base64,` プレフィックスは除去される）
    pub audio: String,

    /// 言語コード（省略時は "en"）
    #[serde(default)]
    pub language: Option<String>,

    /// セグメントタイムスタンプを要求するか
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,

    /// 呼び出し元のメタデータ（結果にworker_id/worker_urlを併合して返す）
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_timestamps() -> bool {
    true
}

/// 転写結果のセグメント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// セグメントのテキスト（前後の空白は除去済み）
    pub text: String,
    /// 開始位置（秒）
    pub start: f64,
    /// 終了位置（秒）
    pub end: f64,
    /// 信頼度（未提供ならnull）
    pub confidence: Option<f64>,
    /// 話者ラベル（未提供ならnull）
    pub speaker: Option<String>,
}

/// 正規化された転写結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// 転写テキスト全体
    pub text: String,
    /// 言語コード（リクエストの値、省略時は "en"）
    pub language: String,
    /// 音声の長さ（秒、最終セグメントの終了位置）
    pub duration: f64,
    /// セグメント一覧
    pub segments: Vec<Segment>,
    /// 全体信頼度（セグメントがあれば1.0、なければ0.0）
    pub confidence: f64,
    /// プロバイダ名（常に "whisper-server"）
    pub provider: String,
    /// 呼び出し元メタデータ + worker_id / worker_url
    pub metadata: HashMap<String, String>,
}

/// whisper-serverの `/inference` レスポンス（寛容デコード）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceResponse {
    /// 転写テキスト
    #[serde(default)]
    pub text: Option<String>,
    /// `text` の別綴り
    #[serde(default)]
    pub transcript: Option<String>,
    /// セグメント一覧
    #[serde(default)]
    pub segments: Vec<RawSegment>,
}

/// `/inference` レスポンス内のセグメント（全フィールド任意）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSegment {
    /// セグメントのテキスト
    #[serde(default)]
    pub text: Option<String>,
    /// 開始位置（秒）
    #[serde(default)]
    pub start: Option<f64>,
    /// 終了位置（秒）
    #[serde(default)]
    pub end: Option<f64>,
    /// 信頼度
    #[serde(default)]
    pub confidence: Option<f64>,
    /// 話者ラベル
    #[serde(default)]
    pub speaker: Option<String>,
}

impl InferenceResponse {
    /// 正規形の転写結果へ変換する
    ///
    /// `text` が無ければ `transcript`、どちらも無ければ空文字列。
    /// セグメントの `end` が無ければ `start` を流用する。
    pub fn into_result(
        self,
        language: &str,
        metadata: HashMap<String, String>,
    ) -> TranscriptionResult {
        let text = self
            .text
            .or(self.transcript)
            .unwrap_or_default();

        let segments: Vec<Segment> = self
            .segments
            .into_iter()
            .map(|s| {
                let start = s.start.unwrap_or(0.0);
                Segment {
                    text: s.text.unwrap_or_default().trim().to_string(),
                    start,
                    end: s.end.unwrap_or(start),
                    confidence: s.confidence,
                    speaker: s.speaker,
                }
            })
            .collect();

        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);
        let confidence = if segments.is_empty() { 0.0 } else { 1.0 };

        TranscriptionResult {
            text,
            language: language.to_string(),
            duration,
            segments,
            confidence,
            provider: PROVIDER_NAME.to_string(),
            metadata,
        }
    }
}

/// プール全体の状態スナップショット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// 登録ワーカー総数
    pub total_workers: usize,
    /// Healthy状態のワーカー数
    pub healthy_workers: usize,
    /// 個別ワーカーの状態
    pub workers: Vec<WorkerSnapshot>,
}

/// 個別ワーカーの状態スナップショット
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// ワーカーID
    pub id: Uuid,
    /// リッスンポート
    pub port: u16,
    /// 状態
    pub state: WorkerState,
    /// 処理したリクエスト数
    pub request_count: u64,
    /// 連続プローブ失敗数
    pub consecutive_failures: u32,
    /// リクエスト受付可否
    pub accepting_requests: bool,
    /// 起動からの経過ミリ秒
    pub uptime_ms: u64,
}

/// `uptime_ms` 計算用のヘルパー
pub(crate) fn millis_since(start: DateTime<Utc>) -> u64 {
    (Utc::now() - start).num_milliseconds().max(0) as u64
}
