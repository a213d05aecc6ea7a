//! # Session KV Local Backend
//!
//! Purpose: A small in-memory RESP2 server speaking the command subset the
//! session driver uses (`AUTH`, `SELECT`, `PING`, `EXISTS`, `GET`, `SET`,
//! `DEL`, `KEYS`, `TTL`). Used as the test backend and for local runs.
//!
//! ## Usage
//!
//! - `BackgroundServer::start` binds an ephemeral port and serves on its own
//!   thread; tests advance its `ManualClock` to expire keys.
//! - The `skv-server` binary serves the wall-clock engine on a fixed address.

pub mod engine;
pub mod protocol;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::debug;

pub use engine::{glob_match, Clock, EngineError, ManualClock, MemoryEngine, SystemClock};
pub use server::{serve, ServerState};

/// A server running on a dedicated thread with its own runtime.
///
/// Dropping the handle stops the accept loop.
pub struct BackgroundServer {
    addr: SocketAddr,
    engine: Arc<MemoryEngine>,
    clock: Arc<ManualClock>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundServer {
    /// Starts an open server on `127.0.0.1:0`.
    pub fn start() -> std::io::Result<Self> {
        Self::start_with_password(None)
    }

    /// Starts a server on `127.0.0.1:0`, requiring `AUTH` when `password`
    /// is set.
    pub fn start_with_password(password: Option<&str>) -> std::io::Result<Self> {
        let clock = Arc::new(ManualClock::new());
        let engine = Arc::new(MemoryEngine::with_clock(clock.clone()));
        let state = Arc::new(ServerState {
            engine: engine.clone(),
            password: password.map(str::to_string),
        });

        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        debug!(error = %err, "failed to register listener");
                        return;
                    }
                };
                tokio::select! {
                    result = serve(listener, state) => {
                        if let Err(err) = result {
                            debug!(error = %err, "accept loop ended");
                        }
                    }
                    _ = stopped => {}
                }
            });
        });

        Ok(BackgroundServer {
            addr,
            engine,
            clock,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The engine behind the server, for direct inspection.
    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }

    /// The clock driving key expiry.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
