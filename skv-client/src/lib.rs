//! # Session KV Sync Client
//!
//! Purpose: A small, blocking Redis-compatible client with connection pooling
//! for the session driver. Connections are authenticated and bound to their
//! logical database once, then reused across calls.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated handshakes.
//! 2. **RAII Release**: A checked-out connection always finds its way back.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod pool;
mod resp;

pub use client::{ClientError, ClientResult, KVClient};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection, DEFAULT_FRESHNESS};
pub use resp::RespValue;
