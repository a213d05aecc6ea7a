//! # Connection Pool
//!
//! Purpose: Keep a bounded set of authenticated, database-selected TCP
//! connections so each driver call pays for a round trip, not a handshake.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Idle connections are reused most-recent-first.
//! 2. **Minimal Locking**: The mutex guards bookkeeping only, never socket I/O.
//! 3. **Fail Fast**: Exceeding the active limit errors instead of waiting.
//! 4. **Trust Then Verify**: Recently used connections are handed out as-is;
//!    older ones must answer `PING` first.
//!
//! ## Lifecycle
//!
//! ```text
//! acquire ──► idle list (newest first) ──► fresh? ──yes──► PooledConnection
//!                 │                          │no
//!                 │ empty                    └─► PING ok? ──no──► drop, retry
//!                 ▼
//!             reserve slot ──► dial + AUTH + SELECT ──► PooledConnection
//!
//! drop(PooledConnection) ──► healthy & room? ──► idle list, else close
//! ```

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Idle connections younger than this are reused without a liveness probe.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379". Host names are resolved.
    pub addr: String,
    /// Sent with `AUTH` on every new connection when set.
    pub password: Option<String>,
    /// Sent with `SELECT` on every new connection when set.
    pub database: Option<String>,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum connections (idle + in-use). Zero means unlimited.
    pub max_total: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Idle age from which a connection is probed with `PING` before reuse.
    pub freshness: Duration,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            database: None,
            max_idle: 30,
            max_total: 100,
            idle_timeout: Some(Duration::from_secs(240)),
            freshness: DEFAULT_FRESHNESS,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the idle list.
    pub idle: usize,
    /// Connections alive (idle + in-use).
    pub total: usize,
}

struct IdleConnection {
    conn: Connection,
    returned_at: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool. No connection is dialed until `acquire`.
    pub fn new(config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Returns the configuration the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection, reusing an idle one when possible.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        while let Some(idle) = self.pop_idle()? {
            if idle.returned_at.elapsed() < self.inner.config.freshness {
                return Ok(PooledConnection::new(self.inner.clone(), idle.conn));
            }

            let mut conn = idle.conn;
            match conn.ping() {
                Ok(()) => return Ok(PooledConnection::new(self.inner.clone(), conn)),
                Err(err) => {
                    debug!(error = %err, "discarding idle connection that failed PING");
                    self.release_slot();
                }
            }
        }

        if !self.try_reserve()? {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::open(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Closes every idle connection and rejects further acquires.
    ///
    /// Connections currently checked out are closed when they are dropped.
    pub fn close(&self) {
        let drained: Vec<IdleConnection> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };
        debug!(closed = drained.len(), "connection pool closed");
    }

    /// Returns true once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns current idle and total connection counts.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            total: state.total,
        }
    }

    /// Pops the newest idle connection, closing any that outlived the idle
    /// timeout on the way.
    fn pop_idle(&self) -> ClientResult<Option<IdleConnection>> {
        let mut stale = Vec::new();
        let popped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ClientError::PoolClosed);
            }

            if let Some(timeout) = self.inner.config.idle_timeout {
                // Oldest connections sit at the front.
                while state
                    .idle
                    .front()
                    .is_some_and(|idle| idle.returned_at.elapsed() >= timeout)
                {
                    if let Some(idle) = state.idle.pop_front() {
                        stale.push(idle);
                    }
                }
                state.total = state.total.saturating_sub(stale.len());
            }

            state.idle.pop_back()
        };

        if !stale.is_empty() {
            debug!(closed = stale.len(), "closed connections past idle timeout");
        }
        Ok(popped)
    }

    fn try_reserve(&self) -> ClientResult<bool> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::PoolClosed);
        }
        let max_total = self.inner.config.max_total;
        if max_total > 0 && state.total >= max_total {
            return Ok(false);
        }
        state.total += 1;
        Ok(true)
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if !state.closed && state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(IdleConnection {
                conn,
                returned_at: Instant::now(),
            });
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII guard returning its connection to the pool on drop.
///
/// A connection that hit an IO or framing error is closed instead, since the
/// reply stream can no longer be trusted.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Sends one command and reads its reply.
    ///
    /// Error replies from the server come back as `Ok(RespValue::Error)`; only
    /// transport and framing failures are `Err`.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::PoolClosed),
        };
        let response = conn.exec(args);
        if response.is_err() {
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Dials, then authenticates and selects the database as configured.
    /// The socket is closed (dropped) on any handshake failure.
    fn open(config: &PoolConfig) -> ClientResult<Self> {
        let mut conn = Connection::dial(config).map_err(|err| {
            warn!(addr = %config.addr, error = %err, "backend dial failed");
            err
        })?;

        if let Some(password) = config.password.as_deref() {
            if let Err(err) = conn.handshake(&[b"AUTH", password.as_bytes()], |message| {
                ClientError::Auth { message }
            }) {
                warn!(addr = %config.addr, error = %err, "backend authentication failed");
                return Err(err);
            }
        }

        if let Some(database) = config.database.as_deref() {
            if let Err(err) = conn.handshake(&[b"SELECT", database.as_bytes()], |message| {
                ClientError::Select { message }
            }) {
                warn!(
                    addr = %config.addr,
                    database,
                    error = %err,
                    "backend database selection failed"
                );
                return Err(err);
            }
        }

        debug!(addr = %config.addr, "opened backend connection");
        Ok(conn)
    }

    fn dial(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // Session payloads are small; don't let Nagle batch them.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn handshake(
        &mut self,
        args: &[&[u8]],
        rejected: impl FnOnce(Vec<u8>) -> ClientError,
    ) -> ClientResult<()> {
        match self.exec(args)? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn ping(&mut self) -> ClientResult<()> {
        match self.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = config
        .addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress)?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.map(ClientError::Io).unwrap_or(ClientError::InvalidAddress))
}
