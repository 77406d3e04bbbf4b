use super::*;

pub const DEFAULT_NAME: &str = "Elios4you";
pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const MIN_SCAN_INTERVAL_SECS: u64 = 30;
pub const MAX_SCAN_INTERVAL_SECS: u64 = 600;
pub const MIN_FAILURES_THRESHOLD: u32 = 1;
pub const MAX_FAILURES_THRESHOLD: u32 = 10;
pub const MAX_RETRY_COUNT: u32 = 10;

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: "192.168.1.100".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            command_timeout_secs: 5,
            chunk_timeout_ms: 1000,
            reuse_timeout_secs: 25,
            drain_timeout_ms: 100,
            retry_count: 2,
            retry_delay_ms: 300,
            check_port_timeout_secs: 3,
            relay_readback_key: "rel".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            failures_threshold: 3,
            enable_repair_notification: true,
            recovery_command: None,
            recovery_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/elios4you.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
        }
    }
}
