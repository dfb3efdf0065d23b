//! ヘルスチェック監視
//!
//! PULL型ヘルスチェックを提供する。プールが各ワーカーの
//! `GET /health` を定期的にポーリングして状態を確認する。

pub mod prober;

pub use prober::HealthProber;
