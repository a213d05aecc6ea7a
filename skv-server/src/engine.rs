//! # In-Memory Engine
//!
//! Backing store for the local RESP backend: a fixed set of logical databases,
//! each a locked hash map with per-key deadlines checked on access.
//!
//! ## Usage
//!
//! - `MemoryEngine::new()` uses the wall clock and 16 databases.
//! - `MemoryEngine::with_clock` takes any `Clock`; tests pass a
//!   `ManualClock` and call `advance` to expire keys without sleeping.
//!
//! ## Design Principles
//!
//! 1. **Lazy Expiry**: Deadlines are checked on access; `KEYS` purges the
//!    database it scans.
//! 2. **Strategy Pattern**: Time comes from a `Clock` so expiry is testable.
//! 3. **Redis Semantics**: Overwriting a key clears its old deadline; glob
//!    matching follows the backend's `KEYS` rules.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

/// Number of logical databases, matching the backend default.
pub const DEFAULT_DATABASES: usize = 16;

/// Errors raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Database index outside `0..databases`.
    #[error("DB index is out of range")]
    InvalidDatabase,
}

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Starts at the current instant.
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

type Database = RwLock<HashMap<Vec<u8>, Entry>>;

/// In-memory multi-database key/value engine.
pub struct MemoryEngine {
    databases: Vec<Database>,
    clock: Arc<dyn Clock>,
}

impl MemoryEngine {
    /// Creates an engine on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an engine driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let databases = (0..DEFAULT_DATABASES)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        MemoryEngine { databases, clock }
    }

    /// Number of logical databases.
    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Returns true when `key` holds a live value.
    pub fn exists(&self, db: usize, key: &[u8]) -> EngineResult<bool> {
        Ok(self.get(db, key)?.is_some())
    }

    /// Returns the live value for `key`, dropping it if expired.
    pub fn get(&self, db: usize, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let database = self.database(db)?;
        let now = self.clock.now();

        {
            let map = database.read();
            match map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: upgrade to a write lock and remove it.
        let mut map = database.write();
        if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            map.remove(key);
        }
        Ok(None)
    }

    /// Stores `value`, replacing any previous value and deadline.
    pub fn set(
        &self,
        db: usize,
        key: Vec<u8>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> EngineResult<()> {
        let database = self.database(db)?;
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        database.write().insert(key, Entry { value, expires_at });
        Ok(())
    }

    /// Removes `key`. Returns true when a live key was removed.
    pub fn delete(&self, db: usize, key: &[u8]) -> EngineResult<bool> {
        let database = self.database(db)?;
        let now = self.clock.now();
        let removed = database.write().remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired(now)))
    }

    /// Lists live keys matching a glob `pattern`.
    pub fn keys(&self, db: usize, pattern: &[u8]) -> EngineResult<Vec<Vec<u8>>> {
        let database = self.database(db)?;
        let now = self.clock.now();
        let mut map = database.write();
        map.retain(|_, entry| !entry.is_expired(now));
        Ok(map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    /// Returns the remaining TTL, `None` for a missing key, `Some(None)` for a
    /// key without expiry.
    pub fn ttl(&self, db: usize, key: &[u8]) -> EngineResult<Option<Option<Duration>>> {
        let database = self.database(db)?;
        let now = self.clock.now();
        let map = database.read();
        Ok(match map.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                Some(entry.expires_at.map(|deadline| deadline - now))
            }
            _ => None,
        })
    }

    fn database(&self, db: usize) -> EngineResult<&Database> {
        self.databases.get(db).ok_or(EngineError::InvalidDatabase)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob matching with the backend's `KEYS` rules: `*`, `?`, `[set]`,
/// `[^set]`, `[a-z]` and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Backtrack point for the most recent `*`: (pattern index after it, text index).
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some(b'*') => {
                star = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some(b'?') => Some(p + 1),
            Some(b'[') => match_class(pattern, p, text[t]),
            Some(b'\\') if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(p + 2),
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match (step, star) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((star_p, star_t))) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p.min(pattern.len())..].iter().all(|&c| c == b'*')
}

/// Matches `c` against the class starting at `pattern[start] == b'['`.
/// Returns the pattern index after the class on a match.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<usize> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // Unterminated class: the backend treats the end of pattern as `]`.
    let next = (i + 1).min(pattern.len());
    (matched != negate).then_some(next)
}
