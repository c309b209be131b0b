use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ZapdeskError;

/// Top-level Zapdesk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sessions: SessionsConfig::default(),
        }
    }
}

/// Session-manager tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Seconds a session may sit in `Starting` before the watchdog forces `Error`.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Connect attempts before giving up and emitting an error event.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Backoff base in milliseconds; doubles on each connect retry.
    #[serde(default = "default_connect_retry_base_ms")]
    pub connect_retry_base_ms: u64,
    /// Capacity of the adapter → manager event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Capacity of each subscriber's event channel.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Per-subscriber send timeout in milliseconds; slower subscribers are pruned.
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    /// Cap on best-effort `adapter.destroy()` during teardown, in seconds.
    #[serde(default = "default_destroy_timeout_secs")]
    pub destroy_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            connect_retries: default_connect_retries(),
            connect_retry_base_ms: default_connect_retry_base_ms(),
            event_buffer: default_event_buffer(),
            subscriber_buffer: default_subscriber_buffer(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            destroy_timeout_secs: default_destroy_timeout_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_secs(self.destroy_timeout_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_init_timeout_secs() -> u64 {
    90
}
fn default_connect_retries() -> u32 {
    3
}
fn default_connect_retry_base_ms() -> u64 {
    500
}
fn default_event_buffer() -> usize {
    64
}
fn default_subscriber_buffer() -> usize {
    64
}
fn default_broadcast_timeout_ms() -> u64 {
    2000
}
fn default_destroy_timeout_secs() -> u64 {
    10
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, ZapdeskError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ZapdeskError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| ZapdeskError::Config(format!("failed to parse {}: {}", path.display(), e)))
}
