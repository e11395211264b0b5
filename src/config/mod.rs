//! # Configuration Management Module
//!
//! All runtime settings for the relay live in a single TOML file. Only
//! `[station]` (port, baud rate), `[storage]` (data_dir) and `[logging]` (level)
//! must be written out; every other field and section falls back to a serde
//! default matching the stock Davis console setup.
//!
//! ## Configuration Structure
//!
//! - [`StationConfig`] - serial port and link-controller timing
//! - [`StorageConfig`] - primary store (local JSON-lines files or HTTP upload endpoint)
//! - [`LoggingConfig`] - log level and optional log file
//! - [`DeliveryConfig`] - shutdown grace and stats logging
//! - [`HeartbeatConfig`] - optional liveness ping
//! - [`TargetsConfig`] - third-party upload targets and their retry policies
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wxrelay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.station.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [station]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//!
//! [storage]
//! kind = "file"
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//!
//! [targets.windguru]
//! enabled = true
//! uid = "my-station"
//! # password may also come from WINDGURU_PASSWORD
//!
//! [targets.windguru.retry]
//! retry_limit = 10
//! retry_delay_ms = 60000
//! backoff = "exponential"
//! timeout_ms = 5000
//! ```
//!
//! ## Credentials
//!
//! Every credential may be left out of the file and supplied through the
//! environment instead (see [`resolve_secret`]). Config values win over the
//! environment; empty strings count as missing.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Command requesting LOOP packets from the console.
    #[serde(default = "default_loop_command")]
    pub loop_command: String,
    /// Delay between handshake attempts until the console answers (ms)
    #[serde(default = "default_handshake_settle_ms")]
    pub handshake_settle_ms: u64,
    /// Delay between the wake newline and the loop command (ms)
    #[serde(default = "default_wake_settle_ms")]
    pub wake_settle_ms: u64,
    /// Quiet period between query cycles (seconds)
    #[serde(default = "default_query_interval_secs")]
    pub query_interval_secs: u64,
    /// Partial packets older than this are dropped when new bytes arrive (seconds)
    #[serde(default = "default_cache_stale_secs")]
    pub cache_stale_secs: u64,
}

fn default_loop_command() -> String {
    "LPS 2 1".to_string()
}
fn default_handshake_settle_ms() -> u64 {
    2000
}
fn default_wake_settle_ms() -> u64 {
    500
}
fn default_query_interval_secs() -> u64 {
    30
}
fn default_cache_stale_secs() -> u64 {
    65
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Append-only JSON-lines files under `data_dir`
    #[default]
    File,
    /// PUT to a remote upload endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StoreKind,
    pub data_dir: String,
    /// Base URL of the upload endpoint; the secret is appended as the last path segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    /// Falls back to UPLOAD_SECRET
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long shutdown waits for in-flight deliveries before abandoning them
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Interval for periodic pipeline stats logging (0 disables)
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_stats_interval_secs() -> u64 {
    300
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Periodic HEAD request telling a monitoring endpoint the relay is alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub interval_secs: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            interval_secs: 60,
            timeout_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    #[default]
    Exponential,
}

/// Per-target retry override. Omitted fields keep the target's stock policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub retry_limit: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Option<BackoffKind>,
    #[serde(default)]
    pub backoff_factor: Option<f64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreTargetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WindguruConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Falls back to WINDGURU_UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Falls back to WINDGURU_PASSWORD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WindyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Falls back to WINDY_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Falls back to WINDY_STATION_ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetOfficeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Falls back to METOFFICE_SITE_ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    /// Falls back to METOFFICE_AUTH_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    #[serde(default = "default_software_type")]
    pub software_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_software_type() -> String {
    format!("wxrelay {}", env!("CARGO_PKG_VERSION"))
}

impl Default for MetOfficeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            site_id: None,
            auth_key: None,
            software_type: default_software_type(),
            retry: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TargetsConfig {
    #[serde(default)]
    pub store: StoreTargetConfig,
    #[serde(default)]
    pub windguru: WindguruConfig,
    #[serde(default)]
    pub windy: WindyConfig,
    #[serde(default)]
    pub metoffice: MetOfficeConfig,
}

/// Resolve a credential: the configured value if non-empty, otherwise the
/// environment variable `env_var` if set and non-empty.
pub fn resolve_secret(value: &Option<String>, env_var: &str) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject settings that would make the link controller spin or the store unusable.
    pub fn validate(&self) -> Result<()> {
        if self.station.baud_rate == 0 {
            return Err(anyhow!("station.baud_rate must be non-zero"));
        }
        if self.station.query_interval_secs == 0 {
            return Err(anyhow!("station.query_interval_secs must be at least 1"));
        }
        if self.station.handshake_settle_ms == 0 {
            return Err(anyhow!("station.handshake_settle_ms must be non-zero"));
        }
        if self.station.loop_command.trim().is_empty() {
            return Err(anyhow!("station.loop_command must not be empty"));
        }
        if self.storage.kind == StoreKind::Http && self.storage.upload_url.is_none() {
            return Err(anyhow!("storage.kind = \"http\" requires storage.upload_url"));
        }
        if self.heartbeat.enabled && self.heartbeat.url.is_none() {
            return Err(anyhow!("heartbeat.enabled requires heartbeat.url"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 19200,
                loop_command: default_loop_command(),
                handshake_settle_ms: default_handshake_settle_ms(),
                wake_settle_ms: default_wake_settle_ms(),
                query_interval_secs: default_query_interval_secs(),
                cache_stale_secs: default_cache_stale_secs(),
            },
            storage: StorageConfig {
                kind: StoreKind::File,
                data_dir: "./data".to_string(),
                upload_url: None,
                upload_secret: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("wxrelay.log".to_string()),
            },
            delivery: DeliveryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            targets: TargetsConfig::default(),
        }
    }
}
