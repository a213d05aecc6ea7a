//! # Session Store
//!
//! Purpose: Implement the host framework's session storage contract on top of
//! the pooled backend client.
//!
//! ## Design Principles
//! 1. **Stateless**: The backend is the only copy of session data; nothing is
//!    cached in process.
//! 2. **Scoped Connections**: Each call checks a connection out of the pool
//!    and the guard returns it on every exit path.
//! 3. **No Lazy Connect**: Until `open` succeeds (and after `close`) every
//!    operation fails with `ConnectionUnavailable`.
//! 4. **Errors Returned, Failures Logged**: Backend failures are logged at
//!    WARN and still returned to the caller. Nothing is retried.

use std::time::Duration;

use skv_client::{ClientResult, KVClient, PoolStats};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{Result, StoreError};
use crate::settings::{ConnectionConfig, Settings};

/// Storage contract the host session framework drives.
///
/// `open` is called once before use and `close` once at shutdown; every other
/// method may be called concurrently from many threads.
pub trait SessionStore: Send + Sync {
    /// Materializes the connection pool and verifies the backend is reachable.
    fn open(&mut self) -> Result<()>;
    /// Tears down the connection pool. Safe to call when never opened.
    fn close(&mut self) -> Result<()>;
    /// Returns true when `key` exists.
    fn exists(&self, key: &str) -> Result<bool>;
    /// Returns the payload stored at `key`, `None` when absent or empty.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Stores `data` at `key`, expiring after `ttl` unless it is zero.
    fn write(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()>;
    /// Removes `key`; a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
    /// Removes every key starting with `prefix`.
    fn clear(&self, prefix: &str) -> Result<()>;
    /// Lists every key starting with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
    /// Adds `step` to the counter at `key`, seeding it at `start`.
    fn sequence(&self, key: &str, start: i64, step: i64, ttl: Duration) -> Result<i64>;
}

/// Builds [`RedisStore`] handles from a settings bag.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisDriver;

impl RedisDriver {
    /// Resolves `settings` into a new, unopened store.
    pub fn connect(&self, settings: &Settings) -> RedisStore {
        RedisStore::new(ConnectionConfig::from_settings(settings))
    }
}

/// Session store backed by a Redis-compatible server.
pub struct RedisStore {
    config: ConnectionConfig,
    client: Option<KVClient>,
}

impl RedisStore {
    /// Creates an unopened store.
    pub fn new(config: ConnectionConfig) -> Self {
        RedisStore { config, client: None }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Pool counters, or `None` while the store is closed.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.client.as_ref().map(KVClient::stats)
    }

    fn client(&self) -> Result<&KVClient> {
        self.client.as_ref().ok_or(StoreError::ConnectionUnavailable)
    }

    /// Keys matching `prefix*`, as raw bytes.
    ///
    /// A failed scan is logged and reported as no keys; failing to get a
    /// connection at all is still an error.
    fn scan(&self, prefix: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = logged("keys", prefix, self.client()?.acquire())?;
        let pattern = format!("{prefix}*");
        match conn.keys(pattern.as_bytes()) {
            Ok(keys) => Ok(keys),
            Err(err) => {
                warn!(prefix, error = %err, "session key scan failed, treating as empty");
                Ok(Vec::new())
            }
        }
    }
}

impl SessionStore for RedisStore {
    fn open(&mut self) -> Result<()> {
        if let Some(previous) = self.client.take() {
            previous.close();
        }

        let client = KVClient::with_config(self.config.pool_config());
        // Dial one connection now so an unreachable backend fails here.
        if let Err(err) = client.acquire() {
            client.close();
            return Err(err.into());
        }

        debug!(addr = %self.config.address, "session store opened");
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close();
            debug!(addr = %self.config.address, "session store closed");
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let client = self.client()?;
        logged("exists", key, client.exists(key.as_bytes()))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let client = self.client()?;
        match logged("read", key, client.get(key.as_bytes()))? {
            Some(value) => codec::decode(value),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        let client = self.client()?;

        let value = codec::encode(data);
        if value.is_empty() {
            return Err(StoreError::EmptyData);
        }

        logged("write", key, client.set(key.as_bytes(), value.as_bytes(), Some(ttl)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let client = self.client()?;
        logged("delete", key, client.delete(key.as_bytes())).map(|_| ())
    }

    fn clear(&self, prefix: &str) -> Result<()> {
        let keys = self.scan(prefix)?;
        if keys.is_empty() {
            return Ok(());
        }

        // One key at a time; the first failure stops the sweep and nothing
        // already deleted comes back.
        let mut conn = logged("clear", prefix, self.client()?.acquire())?;
        for key in &keys {
            logged("clear", prefix, conn.delete(key))?;
        }
        Ok(())
    }

    /// Keys that are not valid UTF-8 cannot be named through this API and are
    /// left out; `clear` still removes them.
    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .scan(prefix)?
            .into_iter()
            .filter_map(|key| match String::from_utf8(key) {
                Ok(key) => Some(key),
                Err(err) => {
                    let raw = err.into_bytes();
                    warn!(prefix, key = ?raw, "skipping non-UTF-8 session key");
                    None
                }
            })
            .collect())
    }

    /// Read-increment-write on top of `read` and `write`.
    ///
    /// Not atomic: two callers on the same key can both read the same value
    /// and one increment is lost. Use a server-side increment where exact
    /// counts matter.
    fn sequence(&self, key: &str, start: i64, step: i64, ttl: Duration) -> Result<i64> {
        self.client()?;

        let current = match self.read(key) {
            Ok(Some(data)) => std::str::from_utf8(&data).ok().and_then(|text| text.parse().ok()),
            _ => None,
        };
        let value = current.unwrap_or(start).wrapping_add(step);

        if let Err(err) = self.write(key, value.to_string().as_bytes(), ttl) {
            warn!(key, error = %err, "session sequence write failed");
            return Err(err);
        }
        Ok(value)
    }
}

/// Logs a backend failure for `op` and converts it into a store error.
fn logged<T>(op: &'static str, key: &str, result: ClientResult<T>) -> Result<T> {
    result.map_err(|err| {
        warn!(op, key, error = %err, "session backend call failed");
        StoreError::from(err)
    })
}
