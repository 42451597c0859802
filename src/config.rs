//! # Server Configuration
//!
//! Settings come from an optional YAML file and are then overridden by `MACHWIRE_*`
//! environment variables. Every field has a default, so an empty file (or no file) is a
//! valid configuration.
//!
//! ```yaml
//! http:
//!   keep_alive: true
//!   keep_alive_timeout_secs: 5
//!   request_timeout_secs: 60
//!   max_requests: 1000
//!   request_max_size: 104857600
//!   max_header_size: 8192
//!   graceful_shutdown_secs: 15
//! runtime:
//!   workers: 1
//!   stack_size: 0x10000
//! debug: false
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `MACHWIRE_KEEP_ALIVE` | `http.keep_alive` |
//! | `MACHWIRE_KEEP_ALIVE_TIMEOUT` | `http.keep_alive_timeout_secs` |
//! | `MACHWIRE_REQUEST_TIMEOUT` | `http.request_timeout_secs` |
//! | `MACHWIRE_MAX_REQUESTS` | `http.max_requests` |
//! | `MACHWIRE_REQUEST_MAX_SIZE` | `http.request_max_size` |
//! | `MACHWIRE_GRACEFUL_SHUTDOWN` | `http.graceful_shutdown_secs` |
//! | `MACHWIRE_WORKERS` | `runtime.workers` |
//! | `MACHWIRE_STACK_SIZE` | `runtime.stack_size` (decimal or `0x` hex) |
//! | `MACHWIRE_DEBUG` | `debug` |

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Connection and protocol limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Server-wide keep-alive switch.
    pub keep_alive: bool,
    /// Idle time allowed between requests on a kept-alive connection.
    pub keep_alive_timeout_secs: u64,
    /// Time allowed to receive a complete request once its first byte arrived. Also used
    /// as the write timeout.
    pub request_timeout_secs: u64,
    /// Requests served on one connection before it is closed. `0` means unlimited.
    pub max_requests: u64,
    /// Largest accepted request body in bytes.
    pub request_max_size: u64,
    /// Largest accepted request head in bytes.
    pub max_header_size: usize,
    /// How long a graceful stop waits for in-flight connections.
    pub graceful_shutdown_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            keep_alive_timeout_secs: 5,
            request_timeout_secs: 60,
            max_requests: 1000,
            request_max_size: 100 * 1024 * 1024,
            max_header_size: 8192,
            graceful_shutdown_secs: 15,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_secs)
    }
}

/// Coroutine scheduler settings, applied once via [`RuntimeConfig::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduler threads. `1` gives single-threaded cooperative scheduling.
    pub workers: usize,
    /// Coroutine stack size in bytes.
    #[serde(deserialize_with = "de_stack_size")]
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            stack_size: 0x10000,
        }
    }
}

impl RuntimeConfig {
    /// Configure the `may` scheduler. Must run before the first coroutine is spawned.
    pub fn apply(&self) {
        may::config()
            .set_workers(self.workers.max(1))
            .set_stack_size(self.stack_size);
        tracing::info!(
            workers = self.workers,
            stack_size = self.stack_size,
            "Coroutine runtime configured"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub runtime: RuntimeConfig,
    /// Include internal error details in 500 responses.
    pub debug: bool,
}

impl ServerConfig {
    /// Load `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from `MACHWIRE_*` variables. Unparseable values are ignored with a
    /// warning.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let http = &mut self.http;
        override_with(&var, "MACHWIRE_KEEP_ALIVE", parse_bool, &mut http.keep_alive);
        override_with(&var, "MACHWIRE_KEEP_ALIVE_TIMEOUT", parse_num, &mut http.keep_alive_timeout_secs);
        override_with(&var, "MACHWIRE_REQUEST_TIMEOUT", parse_num, &mut http.request_timeout_secs);
        override_with(&var, "MACHWIRE_MAX_REQUESTS", parse_num, &mut http.max_requests);
        override_with(&var, "MACHWIRE_REQUEST_MAX_SIZE", parse_num, &mut http.request_max_size);
        override_with(&var, "MACHWIRE_GRACEFUL_SHUTDOWN", parse_num, &mut http.graceful_shutdown_secs);
        override_with(&var, "MACHWIRE_WORKERS", parse_num, &mut self.runtime.workers);
        override_with(&var, "MACHWIRE_STACK_SIZE", parse_size, &mut self.runtime.stack_size);
        override_with(&var, "MACHWIRE_DEBUG", parse_bool, &mut self.debug);
    }
}

fn override_with<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: fn(&str) -> Option<T>,
    slot: &mut T,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match parse(raw.trim()) {
        Some(value) => *slot = value,
        None => tracing::warn!(variable = key, value = %raw, "Ignoring unparseable environment override"),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

/// Decimal or `0x`-prefixed hexadecimal byte count.
fn parse_size(s: &str) -> Option<usize> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn de_stack_size<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(usize),
        Text(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => parse_size(s.trim())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid stack size `{s}`"))),
    }
}
