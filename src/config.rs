//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hub::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_shutdown_grace() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Polling ingestor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_poll_url")]
    pub url: String,

    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub skip_unchanged: bool,

    /// Send the upstream state to each new subscriber before relayed updates
    #[serde(default = "default_true")]
    pub snapshot_on_connect: bool,

    /// Bound on the connect-time snapshot fetch. Broadcasts queue up behind
    /// the snapshot meanwhile, so keep this well under the poll timeout.
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_ms: u64,
}

fn default_poll_url() -> String {
    "http://localhost:3000/counters".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_poll_timeout() -> u64 {
    2000
}

fn default_snapshot_timeout() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_poll_url(),
            interval_ms: default_poll_interval(),
            timeout_ms: default_poll_timeout(),
            skip_unchanged: false,
            snapshot_on_connect: true,
            snapshot_timeout_ms: default_snapshot_timeout(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// Streaming ingestor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_stream_url")]
    pub url: String,

    #[serde(default = "default_read_wait")]
    pub read_wait_ms: u64,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Bound on reaching the upstream and receiving its response headers
    #[serde(default = "default_stream_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Longest record accepted before the connection is reset
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    /// Query parameter carrying the resume cursor on reconnect
    pub cursor_param: Option<String>,
}

fn default_stream_url() -> String {
    "http://localhost:3000/updates".to_string()
}

fn default_read_wait() -> u64 {
    1000
}

fn default_retry_delay() -> u64 {
    500
}

fn default_stream_connect_timeout() -> u64 {
    10_000
}

fn default_max_record_bytes() -> usize {
    crate::ingest::DEFAULT_MAX_RECORD_BYTES
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_stream_url(),
            read_wait_ms: default_read_wait(),
            retry_delay_ms: default_retry_delay(),
            connect_timeout_ms: default_stream_connect_timeout(),
            max_record_bytes: default_max_record_bytes(),
            cursor_param: None,
        }
    }
}

impl StreamConfig {
    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Heartbeat ingestor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_true")]
    pub skip_when_empty: bool,
}

fn default_heartbeat_interval() -> u64 {
    500
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_heartbeat_interval(),
            skip_when_empty: true,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment.
    ///
    /// Runs before logging is configured, so nothing is logged here; the
    /// returned [`DefaultLoad`] says which file was used and which failed.
    pub fn load_default() -> DefaultLoad {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("relay").join("config.toml")),
            Some(PathBuf::from("/etc/relay/config.toml")),
            Some(PathBuf::from("./relay.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing file in `paths` that parses and validates
    fn load_first(paths: &[PathBuf]) -> DefaultLoad {
        let mut failures = Vec::new();

        for path in paths.iter().filter(|path| path.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    return DefaultLoad {
                        config,
                        path: Some(path.clone()),
                        failures,
                    }
                }
                Err(e) => failures.push(e),
            }
        }

        DefaultLoad {
            config: Self::from_env(),
            path: None,
            failures,
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.queue_capacity must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("poll.interval_ms", self.poll.interval_ms),
            ("poll.timeout_ms", self.poll.timeout_ms),
            ("poll.snapshot_timeout_ms", self.poll.snapshot_timeout_ms),
            ("stream.read_wait_ms", self.stream.read_wait_ms),
            ("stream.connect_timeout_ms", self.stream.connect_timeout_ms),
            ("heartbeat.interval_ms", self.heartbeat.interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if self.stream.max_record_bytes == 0 {
            return Err(ConfigError::Invalid(
                "stream.max_record_bytes must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(host) = var("RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("RELAY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Some(origins) = var("RELAY_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }

        // Hub overrides
        if let Some(capacity) = var("RELAY_QUEUE_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.hub.queue_capacity = c;
            }
        }

        // Upstream overrides; naming a URL turns the ingestor on
        if let Some(url) = var("RELAY_POLL_URL") {
            self.poll.url = url;
            self.poll.enabled = true;
        }
        if let Some(url) = var("RELAY_STREAM_URL") {
            self.stream.url = url;
            self.stream.enabled = true;
        }

        // Logging overrides
        if let Some(level) = var("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Outcome of [`Config::load_default`]
#[derive(Debug)]
pub struct DefaultLoad {
    pub config: Config,
    /// File the config came from, `None` for defaults plus environment
    pub path: Option<PathBuf>,
    /// Files that existed but could not be loaded
    pub failures: Vec<ConfigError>,
}

impl DefaultLoad {
    /// Report how the config was resolved
    pub fn log(&self) {
        for failure in &self.failures {
            tracing::warn!("Skipped config file: {}", failure);
        }
        match &self.path {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Relay Configuration
#
# Environment variables override these settings:
# - RELAY_HOST
# - RELAY_PORT
# - RELAY_CORS_ORIGINS (comma separated)
# - RELAY_QUEUE_CAPACITY
# - RELAY_POLL_URL (also enables polling)
# - RELAY_STREAM_URL (also enables streaming)
# - RELAY_LOG_LEVEL
# - RELAY_LOG_FORMAT

[server]
host = "0.0.0.0"
port = 8080

# Allowed CORS origins (empty list allows any origin)
cors_origins = ["http://localhost:5173"]

# How long ingestors get to stop on shutdown (ms)
shutdown_grace_ms = 5000

[hub]
# Pending payloads per subscriber before it is disconnected as too slow
queue_capacity = 8

# Maximum concurrent subscribers (0 = unlimited)
max_subscribers = 0

[poll]
# Poll a request/response upstream for its current state
enabled = false
url = "http://localhost:3000/counters"
interval_ms = 500
timeout_ms = 2000

# Don't re-broadcast a payload identical to the previous poll
skip_unchanged = false

# Send the upstream state to each new subscriber on connect
snapshot_on_connect = true

# Bound on the connect-time snapshot (ms). Updates queue behind it meanwhile.
snapshot_timeout_ms = 500

[stream]
# Read newline-delimited records from a long-lived upstream response
enabled = false
url = "http://localhost:3000/updates"
read_wait_ms = 1000
retry_delay_ms = 500

# Bound on connecting and receiving response headers (ms)
connect_timeout_ms = 10000

# Longest accepted record; longer lines reset the connection
max_record_bytes = 1048576

# Query parameter used to resume from the last consumed record
# cursor_param = "offset"

[heartbeat]
# Broadcast {"type":"users","count":N} periodically
enabled = true
interval_ms = 500
skip_when_empty = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.addr(), "0.0.0.0:8080");
        assert_eq!(config.hub.queue_capacity, 8);
        assert!(!config.poll.enabled);
        assert!(!config.stream.enabled);
        assert!(config.heartbeat.enabled);
        assert!(config.heartbeat.skip_when_empty);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.poll.interval_ms, 500);
        assert_eq!(config.stream.cursor_param, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[hub]\nqueue_capacity = 2\n\n[poll]\nenabled = true\nurl = \"http://upstream/state\"\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.hub.queue_capacity, 2);
        assert!(config.poll.enabled);
        assert_eq!(config.poll.url, "http://upstream/state");
        assert_eq!(config.poll.timeout_ms, 2000);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[hub]\nqueue_capacity = 0\n").unwrap();

        let result = Config::load(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/relay.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();

        let result = Config::load(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RELAY_PORT", "9000"),
            ("RELAY_CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("RELAY_POLL_URL", "http://counter:3000/counters"),
            ("RELAY_QUEUE_CAPACITY", "not a number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.server.cors_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert!(config.poll.enabled);
        assert_eq!(config.poll.url, "http://counter:3000/counters");
        assert_eq!(config.hub.queue_capacity, 8);
        assert!(!config.stream.enabled);
    }

    #[test]
    fn test_load_first_reports_broken_files() {
        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "[hub]\nqueue_capacity = \"eight\"\n").unwrap();
        let mut valid = tempfile::NamedTempFile::new().unwrap();
        write!(valid, "[hub]\nqueue_capacity = 3\n").unwrap();

        let paths = vec![
            PathBuf::from("/nonexistent/relay.toml"),
            broken.path().to_path_buf(),
            valid.path().to_path_buf(),
        ];
        let loaded = Config::load_first(&paths);

        assert_eq!(loaded.path.as_deref(), Some(valid.path()));
        assert_eq!(loaded.failures.len(), 1);
        assert!(matches!(loaded.failures[0], ConfigError::Parse { .. }));
        assert_eq!(loaded.config.hub.queue_capacity, 3);
    }

    #[test]
    fn test_load_first_falls_back_to_defaults() {
        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "[hub]\nqueue_capacity = 0\n").unwrap();

        let loaded = Config::load_first(&[broken.path().to_path_buf()]);

        assert!(loaded.path.is_none());
        assert_eq!(loaded.failures.len(), 1);
        assert!(matches!(loaded.failures[0], ConfigError::Invalid(_)));
    }
}
