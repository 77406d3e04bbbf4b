//! Configuration management for Elios4you
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{Elios4YouError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

mod defaults;

pub use defaults::{
    DEFAULT_NAME, DEFAULT_PORT, DEFAULT_SCAN_INTERVAL_SECS, MAX_FAILURES_THRESHOLD,
    MAX_RETRY_COUNT, MAX_SCAN_INTERVAL_SECS, MIN_FAILURES_THRESHOLD, MIN_SCAN_INTERVAL_SECS,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which monitor to talk to
    pub device: DeviceConfig,

    /// Socket, framing and retry tuning
    pub connection: ConnectionConfig,

    /// Poll schedule and failure escalation
    pub polling: PollingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,
}

/// Identity and address of the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Display name
    pub name: String,

    /// Hostname or IP address of the monitor
    pub host: String,

    /// TCP port (5001 on stock firmware)
    pub port: u16,
}

/// Connection, framing and retry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bound on opening the socket
    pub connect_timeout_secs: u64,

    /// Single deadline shared by the write and the read until terminator
    pub command_timeout_secs: u64,

    /// Bound on each individual socket read inside a round-trip
    pub chunk_timeout_ms: u64,

    /// An idle connection older than this is replaced instead of reused
    pub reuse_timeout_secs: u64,

    /// How long to wait for stray bytes when closing
    pub drain_timeout_ms: u64,

    /// Extra attempts after a failed round-trip
    pub retry_count: u32,

    /// Pause between a reconnect and the next attempt
    pub retry_delay_ms: u64,

    /// Bound on the pre-flight port check
    pub check_port_timeout_secs: u64,

    /// Key holding the relay state in the `@rel` answer. Older firmware
    /// reports it as `mode`.
    pub relay_readback_key: String,
}

/// Poll schedule and failure escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between poll cycles
    pub scan_interval_secs: u64,

    /// Consecutive failed cycles before an outage is escalated
    pub failures_threshold: u32,

    /// Publish a repair issue when an outage is escalated
    pub enable_repair_notification: bool,

    /// Shell command run once per outage when it is escalated
    pub recovery_command: Option<String>,

    /// Bound on the recovery command
    pub recovery_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console level override
    pub console_level: Option<String>,

    /// Optional file level override
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Serve the local HTTP API
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn reuse_timeout(&self) -> Duration {
        Duration::from_secs(self.reuse_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn check_port_timeout(&self) -> Duration {
        Duration::from_secs(self.check_port_timeout_secs)
    }
}

impl PollingConfig {
    /// Scan interval with the lower bound enforced
    pub fn effective_scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(MIN_SCAN_INTERVAL_SECS))
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "elios4you.yaml",
            "/data/elios4you.yaml",
            "/etc/elios4you/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            return Err(Elios4YouError::validation(
                "device.name",
                "Name cannot be empty",
            ));
        }

        if !host_valid(&self.device.host) {
            return Err(Elios4YouError::validation(
                "device.host",
                "Not a valid IP address or hostname",
            ));
        }

        if self.device.port == 0 {
            return Err(Elios4YouError::validation(
                "device.port",
                "Port must be greater than 0",
            ));
        }

        let c = &self.connection;
        if c.connect_timeout_secs == 0 || c.command_timeout_secs == 0 || c.chunk_timeout_ms == 0 {
            return Err(Elios4YouError::validation(
                "connection",
                "Timeouts must be greater than 0",
            ));
        }

        if c.retry_count > MAX_RETRY_COUNT {
            return Err(Elios4YouError::Validation {
                field: "connection.retry_count".to_string(),
                message: format!("Must be at most {}", MAX_RETRY_COUNT),
            });
        }

        if c.relay_readback_key.trim().is_empty() {
            return Err(Elios4YouError::validation(
                "connection.relay_readback_key",
                "Key cannot be empty",
            ));
        }

        let p = &self.polling;
        if !(MIN_SCAN_INTERVAL_SECS..=MAX_SCAN_INTERVAL_SECS).contains(&p.scan_interval_secs) {
            return Err(Elios4YouError::Validation {
                field: "polling.scan_interval_secs".to_string(),
                message: format!(
                    "Must be between {} and {}",
                    MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS
                ),
            });
        }

        if !(MIN_FAILURES_THRESHOLD..=MAX_FAILURES_THRESHOLD).contains(&p.failures_threshold) {
            return Err(Elios4YouError::Validation {
                field: "polling.failures_threshold".to_string(),
                message: format!(
                    "Must be between {} and {}",
                    MIN_FAILURES_THRESHOLD, MAX_FAILURES_THRESHOLD
                ),
            });
        }

        if let Some(cmd) = &p.recovery_command
            && cmd.trim().is_empty()
        {
            return Err(Elios4YouError::validation(
                "polling.recovery_command",
                "Command cannot be blank",
            ));
        }

        Ok(())
    }
}

/// Check whether `host` is an IPv4/IPv6 literal or a plausible hostname.
///
/// Dotted all-numeric strings that failed IP parsing (`192.168.1.256`) are
/// rejected instead of being treated as hostnames.
pub fn host_valid(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    let parts: Vec<&str> = host.split('.').collect();
    if parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        return false;
    }
    parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}
