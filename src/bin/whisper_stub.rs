//! whisper-server 開発スタブ
//!
//! whisper.cpp本体なしでwhisperlbを動かすための、子プロセスHTTP
//! コントラクト（`GET /health`, `POST /inference`）の最小実装。
//! 応答のステータス・遅延・自動終了をフラグで制御できるので、
//! 統合テストの子プロセスとしても使う。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;

/// whisper-server互換の開発スタブ
#[derive(Parser, Clone)]
#[command(name = "whisper_stub", version, about)]
struct Args {
    /// リッスンポート
    #[arg(long)]
    port: u16,

    /// モデルパス（無視されるが、whisper-server互換のため受け取る）
    #[arg(long)]
    model: Option<String>,

    /// スレッド数（同上）
    #[arg(long)]
    threads: Option<u32>,

    /// /inference が返す転写テキスト
    #[arg(long, default_value = "hello world")]
    text: String,

    /// /inference が返すHTTPステータス
    #[arg(long, default_value_t = 200)]
    inference_status: u16,

    /// /health が返すHTTPステータス
    #[arg(long, default_value_t = 200)]
    health_status: u16,

    /// /inference の応答前に入れる遅延（ミリ秒）
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// 起動からこのミリ秒後に自動終了する（クラッシュの再現用）
    #[arg(long)]
    exit_after_ms: Option<u64>,

    /// 応答に含めるセグメント数
    #[arg(long, default_value_t = 1)]
    segment_count: usize,
}

fn status_or_ok(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

async fn health(State(args): State<Arc<Args>>) -> StatusCode {
    status_or_ok(args.health_status)
}

async fn inference(State(args): State<Arc<Args>>, _body: Bytes) -> Response {
    if args.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    let status = status_or_ok(args.inference_status);
    if !status.is_success() {
        return (status, "stub inference failure").into_response();
    }

    let segments: Vec<serde_json::Value> = (0..args.segment_count)
        .map(|i| {
            json!({
                "text": args.text,
                "start": i as f64,
                "end": (i + 1) as f64,
                "confidence": 0.9,
            })
        })
        .collect();

    (
        status,
        Json(json!({
            "text": args.text,
            "segments": segments,
        })),
    )
        .into_response()
}

#[tokio::main]
async fn main() {
    let args = Arc::new(Args::parse());

    if let Some(exit_after_ms) = args.exit_after_ms {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(exit_after_ms)).await;
            std::process::exit(1);
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/inference", post(inference))
        .with_state(args.clone());

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("whisper_stub: failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "whisper_stub listening on {addr} (model: {:?}, threads: {:?})",
        args.model, args.threads
    );

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("whisper_stub: server error: {e}");
        std::process::exit(1);
    }
}
