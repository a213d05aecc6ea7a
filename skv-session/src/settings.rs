//! Settings bag and resolved connection configuration.
//!
//! The host framework hands over a loosely typed bag of options. It is
//! deserialized once into [`Settings`] (wrong types are rejected there), then
//! folded over the defaults into a [`ConnectionConfig`], where out-of-range
//! or unparseable values quietly keep the default.

use std::time::Duration;

use serde::Deserialize;
use skv_client::{PoolConfig, DEFAULT_FRESHNESS};

use crate::error::{Result, StoreError};

/// Default backend address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:6379";
/// Default maximum idle connections.
pub const DEFAULT_IDLE: usize = 30;
/// Default maximum active connections.
pub const DEFAULT_ACTIVE: usize = 100;
/// Default idle-connection timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);

/// Options recognized in the settings bag. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `host:port` of the backend.
    pub server: Option<String>,
    /// Credential sent with `AUTH`.
    pub password: Option<String>,
    /// Logical database selector.
    pub database: Option<DatabaseSetting>,
    /// Maximum idle connections.
    pub idle: Option<i64>,
    /// Maximum active connections.
    pub active: Option<i64>,
    /// Idle-connection timeout.
    pub timeout: Option<DurationSetting>,
    /// TCP connect timeout.
    pub connect_timeout: Option<DurationSetting>,
    /// TCP read timeout.
    pub read_timeout: Option<DurationSetting>,
    /// TCP write timeout.
    pub write_timeout: Option<DurationSetting>,
}

/// A database given by name or by index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DatabaseSetting {
    Index(i64),
    Name(String),
}

/// A duration given as whole seconds or as text such as `"90s"` or `"1h30m"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Seconds(i64),
    Text(String),
}

impl DurationSetting {
    /// Resolves to a duration, or `None` when the value should be ignored.
    pub fn resolve(&self) -> Option<Duration> {
        match self {
            DurationSetting::Seconds(secs) if *secs > 0 => Some(Duration::from_secs(*secs as u64)),
            DurationSetting::Seconds(_) => None,
            DurationSetting::Text(text) => parse_duration(text),
        }
    }
}

impl Settings {
    /// Deserializes a settings bag, rejecting options of the wrong type.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|err| StoreError::Settings(err.to_string()))
    }
}

/// Resolved connection configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: String,
    pub password: Option<String>,
    /// `None` leaves the connection on the backend's default database.
    pub database: Option<String>,
    pub idle: usize,
    pub active: usize,
    /// Zero keeps idle connections indefinitely.
    pub idle_timeout: Duration,
    /// Idle connections at least this old are probed before reuse.
    pub freshness: Duration,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            address: DEFAULT_ADDRESS.to_string(),
            password: None,
            database: None,
            idle: DEFAULT_IDLE,
            active: DEFAULT_ACTIVE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            freshness: DEFAULT_FRESHNESS,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Applies `settings` over the defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = ConnectionConfig::default();

        if let Some(server) = settings.server.as_deref().filter(|s| !s.is_empty()) {
            config.address = server.to_string();
        }
        if let Some(password) = settings.password.as_deref().filter(|s| !s.is_empty()) {
            config.password = Some(password.to_string());
        }
        config.database = match &settings.database {
            Some(DatabaseSetting::Index(index)) => Some(index.to_string()),
            Some(DatabaseSetting::Name(name)) if !name.is_empty() => Some(name.clone()),
            _ => None,
        };

        if let Some(idle) = settings.idle.filter(|n| *n > 0) {
            config.idle = idle as usize;
        }
        if let Some(active) = settings.active.filter(|n| *n > 0) {
            config.active = active as usize;
        }
        if let Some(timeout) = settings.timeout.as_ref().and_then(DurationSetting::resolve) {
            config.idle_timeout = timeout;
        }

        let resolve =
            |setting: &Option<DurationSetting>| setting.as_ref().and_then(DurationSetting::resolve);
        config.connect_timeout = resolve(&settings.connect_timeout);
        config.read_timeout = resolve(&settings.read_timeout);
        config.write_timeout = resolve(&settings.write_timeout);

        config
    }

    /// Overrides the liveness-probe threshold.
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Builds the client pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            addr: self.address.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            max_idle: self.idle,
            max_total: self.active,
            idle_timeout: (!self.idle_timeout.is_zero()).then_some(self.idle_timeout),
            freshness: self.freshness,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Parses Go-style durations: one or more `<number><unit>` terms such as
/// `"300ms"`, `"1.5h"` or `"2h45m"`, plus `d` and `w`. A bare `"0"` is zero.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let text = text.strip_prefix('+').unwrap_or(text);
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }

    let mut rest = text;
    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = unit_nanos(&rest[..unit_len])?;
        rest = &rest[unit_len..];

        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos as u64))
}

fn unit_nanos(unit: &str) -> Option<f64> {
    const SECOND: f64 = 1e9;
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => SECOND,
        "m" => 60.0 * SECOND,
        "h" => 3_600.0 * SECOND,
        "d" => 86_400.0 * SECOND,
        "w" => 604_800.0 * SECOND,
        _ => return None,
    })
}
