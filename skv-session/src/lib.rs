//! # Session KV Driver
//!
//! Purpose: Persist framework sessions in a Redis-compatible backend over a
//! pooled connection.
//!
//! Payloads are stored base64-encoded, expiry is delegated to the backend
//! (`SET ... EX`), and prefix listing/clearing use the backend's `KEYS` glob.
//!
//! ```no_run
//! use std::time::Duration;
//! use skv_session::{RedisDriver, SessionStore, Settings};
//!
//! # fn main() -> skv_session::Result<()> {
//! let settings = Settings::from_value(serde_json::json!({
//!     "server": "127.0.0.1:6379",
//!     "database": "2",
//!     "timeout": "5m",
//! }))?;
//! let mut store = RedisDriver.connect(&settings);
//! store.open()?;
//! store.write("session:abc", b"payload", Duration::from_secs(3600))?;
//! assert_eq!(store.read("session:abc")?, Some(b"payload".to_vec()));
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod settings;
pub mod store;

pub use error::{Result, StoreError};
pub use settings::{ConnectionConfig, DatabaseSetting, DurationSetting, Settings};
pub use store::{RedisDriver, RedisStore, SessionStore};
