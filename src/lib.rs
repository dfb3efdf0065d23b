//! whisper-server Supervising load balancer
//!
//! 複数のwhisper-server子プロセスを監督する単一HTTPサービス

#![warn(missing_docs)]

/// 共通型定義・エラー型
pub mod common;

/// REST APIハンドラー
pub mod api;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// ヘルスチェック監視
pub mod health;

/// ロギング初期化ユーティリティ
pub mod logging;

/// ワーカープール管理（スポーン・監査・交代・選択）
pub mod pool;

/// 推論リクエストのプロキシ経路
pub mod proxy;

/// ワーカープロセス制御
pub mod worker;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    /// ワーカープール
    pub pool: pool::WorkerPool,
}
