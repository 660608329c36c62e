//! Pipeline configuration.
//!
//! The configuration is captured once by [`crate::Pipeline::start`] and is
//! fixed for the lifetime of the pipeline.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backlog::OverflowPolicy;
use crate::error::{LogBusError, LogBusResult};
use crate::event::{RecordFormat, DEFAULT_TIMESTAMP_FORMAT};
use crate::level::Level;
use crate::sink::{ColorChoice, RotationInterval};

/// Default size at which a stream file is rotated (5 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Default number of rotated backups kept per stream.
pub const DEFAULT_RETENTION_COUNT: usize = 30;

/// Configuration for a [`crate::Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBusConfig {
    /// Directory holding one `<stream>.log` per stream
    pub log_dir: PathBuf,

    /// Time boundary that forces a rotation
    pub rotation_interval: RotationInterval,

    /// Rotate before a write would bring the file to this size (0 disables)
    pub max_file_bytes: u64,

    /// Backups kept per stream (0 keeps all)
    pub retention_count: usize,

    /// strftime pattern for record timestamps
    pub timestamp_format: String,

    /// Mirror events to stdout
    pub console_enabled: bool,

    /// Minimum level for the console
    pub console_min_level: Level,

    /// Color handling for the console
    pub console_color: ColorChoice,

    /// Minimum level written to stream files
    pub file_min_level: Level,

    /// Per-stream overrides of `file_min_level`
    pub stream_levels: HashMap<String, Level>,

    /// Backlog size at which the overflow policy applies (None = no bound)
    pub backlog_capacity: Option<usize>,

    /// What to do when the backlog reaches `backlog_capacity`
    pub overflow_policy: OverflowPolicy,

    /// Unix socket accepting events from other processes
    pub relay_socket: Option<PathBuf>,
}

impl Default for LogBusConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            rotation_interval: RotationInterval::Daily,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            retention_count: DEFAULT_RETENTION_COUNT,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            console_enabled: true,
            console_min_level: Level::LOWEST,
            console_color: ColorChoice::Auto,
            file_min_level: Level::LOWEST,
            stream_levels: HashMap::new(),
            backlog_capacity: None,
            overflow_policy: OverflowPolicy::Grow,
            relay_socket: None,
        }
    }
}

impl LogBusConfig {
    /// Default configuration writing into `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, interval: RotationInterval) -> Self {
        self.rotation_interval = interval;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn with_retention(mut self, retention_count: usize) -> Self {
        self.retention_count = retention_count;
        self
    }

    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Disable console output (only write stream files).
    pub fn no_console(mut self) -> Self {
        self.console_enabled = false;
        self
    }

    pub fn with_console_level(mut self, level: Level) -> Self {
        self.console_min_level = level;
        self
    }

    pub fn with_console_color(mut self, choice: ColorChoice) -> Self {
        self.console_color = choice;
        self
    }

    pub fn with_file_level(mut self, level: Level) -> Self {
        self.file_min_level = level;
        self
    }

    /// Override the file level for one stream.
    pub fn with_stream_level(mut self, stream: impl Into<String>, level: Level) -> Self {
        self.stream_levels.insert(stream.into(), level);
        self
    }

    pub fn with_backlog_capacity(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.backlog_capacity = Some(capacity);
        self.overflow_policy = policy;
        self
    }

    pub fn with_relay_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.relay_socket = Some(path.into());
        self
    }

    /// File level in effect for `stream`.
    pub fn file_level_for(&self, stream: &str) -> Level {
        self.stream_levels
            .get(stream)
            .copied()
            .unwrap_or(self.file_min_level)
    }

    /// Lowest level any sink would accept for `stream`.
    ///
    /// Producers drop events below this without building them.
    pub fn producer_threshold(&self, stream: &str) -> Level {
        let file = self.file_level_for(stream);
        if self.console_enabled {
            file.min(self.console_min_level)
        } else {
            file
        }
    }

    /// Check the configuration before the pipeline starts.
    pub fn validate(&self) -> LogBusResult<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(LogBusError::Config("log_dir must not be empty".into()));
        }
        if !RecordFormat::is_valid_timestamp_format(&self.timestamp_format) {
            return Err(LogBusError::Config(format!(
                "invalid timestamp_format {:?}",
                self.timestamp_format
            )));
        }
        if self.rotation_interval == RotationInterval::Seconds(0) {
            return Err(LogBusError::Config(
                "rotation interval must be at least one second".into(),
            ));
        }
        if self.backlog_capacity == Some(0) {
            return Err(LogBusError::Config(
                "backlog_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogBusConfig::default();
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.rotation_interval, RotationInterval::Daily);
        assert_eq!(config.max_file_bytes, 5 * 1024 * 1024);
        assert_eq!(config.retention_count, 30);
        assert!(config.console_enabled);
        assert_eq!(config.console_min_level, Level::Trace);
        assert_eq!(config.overflow_policy, OverflowPolicy::Grow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LogBusConfig = serde_json::from_str(
            r#"{
                "log_dir": "/var/log/app",
                "rotation_interval": "hourly",
                "max_file_bytes": 1024,
                "file_min_level": "warning",
                "stream_levels": { "noisy": "error" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.log_dir, PathBuf::from("/var/log/app"));
        assert_eq!(config.rotation_interval, RotationInterval::Hourly);
        assert_eq!(config.max_file_bytes, 1024);
        assert_eq!(config.retention_count, DEFAULT_RETENTION_COUNT);
        assert_eq!(config.file_level_for("noisy"), Level::Error);
        assert_eq!(config.file_level_for("other"), Level::Warn);
    }

    #[test]
    fn test_producer_threshold_accounts_for_console() {
        let config = LogBusConfig::new("logs")
            .with_file_level(Level::Info)
            .with_console_level(Level::Debug);
        assert_eq!(config.producer_threshold("svc"), Level::Debug);

        let config = config.no_console();
        assert_eq!(config.producer_threshold("svc"), Level::Info);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_format = LogBusConfig::default().with_timestamp_format("%Q");
        assert!(matches!(bad_format.validate(), Err(LogBusError::Config(_))));

        let empty_dir = LogBusConfig::new("");
        assert!(empty_dir.validate().is_err());

        let zero_interval = LogBusConfig::default().with_rotation(RotationInterval::Seconds(0));
        assert!(zero_interval.validate().is_err());

        let zero_capacity = LogBusConfig::default().with_backlog_capacity(0, OverflowPolicy::Block);
        assert!(zero_capacity.validate().is_err());
    }
}
