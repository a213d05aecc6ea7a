//! # Local Backend Binary
//!
//! Usage: `skv-server [addr] [password]`, defaulting to `127.0.0.1:6379`
//! with no password. Log level follows `RUST_LOG`.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skv_server::{serve, MemoryEngine, ServerState};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let password = args.next().filter(|password| !password.is_empty());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, auth = password.is_some(), "serving");

    let state = Arc::new(ServerState {
        engine: Arc::new(MemoryEngine::new()),
        password,
    });
    serve(listener, state).await.context("accept loop failed")
}
