//! # Synchronous Client API
//!
//! Purpose: Expose the handful of commands the session driver needs as typed,
//! blocking calls over a pooled RESP2 connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and framing.
//! 2. **One Connection Per Call**: Single-command helpers acquire and release
//!    around exactly one round trip.
//! 3. **Multi-Command Scope**: `acquire` hands out the guard itself when a
//!    caller needs several commands on one connection.
//! 4. **Fail Fast**: Unexpected reply shapes surface immediately as errors.

use std::time::Duration;

use crate::pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
use crate::resp::RespValue;

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Pool was closed.
    #[error("connection pool closed")]
    PoolClosed,
    /// Address could not be resolved into a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// `AUTH` was rejected while opening a connection.
    #[error("authentication rejected: {}", String::from_utf8_lossy(.message))]
    Auth { message: Vec<u8> },
    /// `SELECT` was rejected while opening a connection.
    #[error("database selection rejected: {}", String::from_utf8_lossy(.message))]
    Select { message: Vec<u8> },
}

/// Synchronous client with connection pooling.
#[derive(Clone)]
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client over a new, not yet dialed pool.
    pub fn with_config(config: PoolConfig) -> Self {
        KVClient {
            pool: ConnectionPool::new(config),
        }
    }

    /// Checks out one connection for a multi-command sequence.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        self.pool.acquire()
    }

    /// Closes the underlying pool.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Returns pool counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns true when the key exists.
    pub fn exists(&self, key: &[u8]) -> ClientResult<bool> {
        self.acquire()?.exists(key)
    }

    /// Fetches a value by key. `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.acquire()?.get(key)
    }

    /// Sets a value, attaching `EX` in the same command when `ttl` is given.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> ClientResult<()> {
        self.acquire()?.set(key, value, ttl)
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        self.acquire()?.delete(key)
    }

    /// Lists keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> ClientResult<Vec<Vec<u8>>> {
        self.acquire()?.keys(pattern)
    }

    /// Round-trips a `PING`.
    pub fn ping(&self) -> ClientResult<()> {
        self.acquire()?.ping()
    }
}

impl PooledConnection {
    /// `EXISTS key`.
    pub fn exists(&mut self, key: &[u8]) -> ClientResult<bool> {
        match self.exec(&[b"EXISTS", key])?.into_result()? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `GET key`.
    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec(&[b"GET", key])?.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `SET key value [EX seconds]`.
    ///
    /// Expiry is whole seconds; a positive sub-second TTL rounds up to one
    /// second so the key never lands without an expiry.
    pub fn set(&mut self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> ClientResult<()> {
        let response = match ttl.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1).to_string();
                self.exec(&[b"SET", key, value, b"EX", seconds.as_bytes()])?
            }
            None => self.exec(&[b"SET", key, value])?,
        };
        match response.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `DEL key`.
    pub fn delete(&mut self, key: &[u8]) -> ClientResult<bool> {
        match self.exec(&[b"DEL", key])?.into_result()? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `KEYS pattern`.
    pub fn keys(&mut self, pattern: &[u8]) -> ClientResult<Vec<Vec<u8>>> {
        let items = match self.exec(&[b"KEYS", pattern])?.into_result()? {
            RespValue::Array(items) => items,
            _ => return Err(ClientError::UnexpectedResponse),
        };
        items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(Some(key)) => Ok(key),
                _ => Err(ClientError::UnexpectedResponse),
            })
            .collect()
    }

    /// `PING`.
    pub fn ping(&mut self) -> ClientResult<()> {
        match self.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
