//! Engine configuration
//!
//! The embedding application supplies an [`EngineConfig`] once at load time,
//! either constructed in code or parsed from a TOML file. Durable engine state
//! (origin store, log files) follows the XDG Base Directory Specification:
//! - Data: `$XDG_DATA_HOME/sessium/` (~/.local/share/sessium/)
//! - State/Logs: `$XDG_STATE_HOME/sessium/` (~/.local/state/sessium/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main engine configuration, supplied once at load time.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    /// Collector base URL (e.g. `https://collect.example.com`)
    #[serde(default)]
    pub endpoint_base_url: String,

    /// Site identifier issued by the collector
    #[serde(default)]
    pub site_id: String,

    /// Whether the visitor granted recording consent.
    ///
    /// When false, the loader refuses to initialize and no capture or
    /// network activity ever happens.
    #[serde(default)]
    pub consent_granted: bool,

    /// Verbose diagnostic logging
    #[serde(default)]
    pub debug: bool,

    /// Sampling intervals for continuous signals
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Queue and flush behavior
    #[serde(default)]
    pub queue: QueueConfig,

    /// Privacy masking rules
    #[serde(default)]
    pub privacy: PrivacyConfig,

    /// Delivery transport tuning
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Acceleration bridge settings
    #[serde(default)]
    pub acceleration: AccelConfig,

    /// Lifecycle timers
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Loader retry policy
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Minimum inter-sample intervals for high-frequency signals.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Minimum milliseconds between captured pointer-move records
    #[serde(default = "default_pointer_move_ms")]
    pub pointer_move_ms: u64,

    /// Minimum milliseconds between captured scroll records
    #[serde(default = "default_scroll_ms")]
    pub scroll_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            pointer_move_ms: default_pointer_move_ms(),
            scroll_ms: default_scroll_ms(),
        }
    }
}

fn default_pointer_move_ms() -> u64 {
    50
}

fn default_scroll_ms() -> u64 {
    100
}

/// Queue sizing and flush triggers.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Milliseconds between timer-triggered flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Queue ceiling; reaching it forces an immediate flush
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_max_queue_size() -> usize {
    250
}

/// Privacy masking rules applied at capture time.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PrivacyConfig {
    /// Field selectors whose values are always masked
    #[serde(default)]
    pub mask_selectors: Vec<String>,
}

/// Delivery transport tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for the session-create call
    #[serde(default = "default_delivery_max_retries")]
    pub max_retries: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout(),
            max_retries: default_delivery_max_retries(),
        }
    }
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_delivery_max_retries() -> usize {
    2
}

/// Acceleration bridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AccelConfig {
    /// Whether to attempt the accelerated masking/compaction path
    #[serde(default = "default_accel_enabled")]
    pub enabled: bool,

    /// Time bound on bridge initialization in milliseconds
    #[serde(default = "default_accel_init_timeout")]
    pub init_timeout_ms: u64,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            enabled: default_accel_enabled(),
            init_timeout_ms: default_accel_init_timeout(),
        }
    }
}

fn default_accel_enabled() -> bool {
    true
}

fn default_accel_init_timeout() -> u64 {
    3000
}

/// Lifecycle timer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Heartbeat interval while recording and visible, in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Hidden-page threshold before the idle-hidden exit send, in milliseconds
    #[serde(default = "default_abandonment_timeout")]
    pub abandonment_timeout_ms: u64,

    /// Session inactivity TTL in minutes
    #[serde(default = "default_session_ttl")]
    pub session_ttl_minutes: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            abandonment_timeout_ms: default_abandonment_timeout(),
            session_ttl_minutes: default_session_ttl(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_abandonment_timeout() -> u64 {
    120_000
}

fn default_session_ttl() -> i64 {
    30
}

/// Loader retry policy for transient initialization failures.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Max load attempts before failing permanently for the page lifetime
    #[serde(default = "default_loader_attempts")]
    pub max_attempts: usize,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_loader_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_loader_attempts(),
            retry_delay_ms: default_loader_retry_delay(),
        }
    }
}

fn default_loader_attempts() -> usize {
    3
}

fn default_loader_retry_delay() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl EngineConfig {
    /// Create a configuration with the two required fields set.
    ///
    /// `consent_granted` still defaults to false and must be set explicitly
    /// once the embedder has gathered consent.
    pub fn new(endpoint_base_url: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            endpoint_base_url: endpoint_base_url.into(),
            site_id: site_id.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration, returning an error message if invalid.
    ///
    /// Consent is checked here on purpose: a missing consent grant is a fatal
    /// configuration error that must stop initialization before any capture
    /// or network activity.
    pub fn validate(&self) -> Result<()> {
        if self.site_id.trim().is_empty() {
            return Err(Error::Config("site_id is required".to_string()));
        }
        if self.endpoint_base_url.trim().is_empty() {
            return Err(Error::Config("endpoint_base_url is required".to_string()));
        }
        if !self.endpoint_base_url.starts_with("http://")
            && !self.endpoint_base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "endpoint_base_url must be an http(s) URL, got {:?}",
                self.endpoint_base_url
            )));
        }
        if !self.consent_granted {
            return Err(Error::Config(
                "consent_granted is false; recording is not permitted".to_string(),
            ));
        }
        if self.queue.max_queue_size == 0 {
            return Err(Error::Config(
                "queue.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.loader.max_attempts == 0 {
            return Err(Error::Config(
                "loader.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the data directory path (for the origin-durable store)
    ///
    /// `$XDG_DATA_HOME/sessium/` (~/.local/share/sessium/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("sessium")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/sessium/` (~/.local/state/sessium/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("sessium")
    }

    /// Returns the origin-durable store file path
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("sessium.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            consent_granted: true,
            ..EngineConfig::new("https://collect.example.com", "site-1")
        }
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sampling.pointer_move_ms, 50);
        assert_eq!(config.sampling.scroll_ms, 100);
        assert_eq!(config.queue.flush_interval_ms, 5000);
        assert_eq!(config.queue.max_queue_size, 250);
        assert_eq!(config.lifecycle.heartbeat_interval_ms, 30_000);
        assert_eq!(config.lifecycle.abandonment_timeout_ms, 120_000);
        assert_eq!(config.lifecycle.session_ttl_minutes, 30);
        assert_eq!(config.loader.max_attempts, 3);
        assert!(!config.consent_granted);
    }

    #[test]
    fn test_parse_config() {
        let toml = r##"
endpoint_base_url = "https://collect.example.com"
site_id = "acme-prod"
consent_granted = true

[sampling]
pointer_move_ms = 25

[queue]
flush_interval_ms = 8000
max_queue_size = 3

[privacy]
mask_selectors = ["#card-number", "input[name=cvv]"]
"##;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.site_id, "acme-prod");
        assert!(config.consent_granted);
        assert_eq!(config.sampling.pointer_move_ms, 25);
        assert_eq!(config.sampling.scroll_ms, 100);
        assert_eq!(config.queue.max_queue_size, 3);
        assert_eq!(config.privacy.mask_selectors.len(), 2);
    }

    #[test]
    fn test_validate_requires_site_id() {
        let mut config = valid_config();
        config.site_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_http_url() {
        let mut config = valid_config();
        config.endpoint_base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_consent() {
        let mut config = valid_config();
        config.consent_granted = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consent"));
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_ok());
    }
}
