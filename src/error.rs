//! Error types and handling for Elios4you
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting. The two device-facing
//! variants (`Connection` and `Command`) are the typed failures a poll cycle
//! surfaces to its scheduler.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for Elios4you operations
pub type Result<T> = std::result::Result<T, Elios4YouError>;

/// Main error type for Elios4you
#[derive(Debug, Error)]
pub enum Elios4YouError {
    /// Transport could not be established or was lost
    #[error("{message}")]
    Connection {
        host: String,
        port: u16,
        timeout_secs: u64,
        message: String,
    },

    /// A command round-trip failed after retries, or its response was unusable
    #[error("{message}")]
    Command { command: String, message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File and socket I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

/// Coarse classification used for failure tracking and device events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The device could not be reached at all
    DeviceUnreachable,
    /// The device accepted the connection but did not answer usefully
    DeviceNotResponding,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnreachable => "device_unreachable",
            ErrorKind::DeviceNotResponding => "device_not_responding",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Elios4YouError {
    /// Create a connection error with the default message
    pub fn connection<S: Into<String>>(host: S, port: u16, timeout_secs: u64) -> Self {
        let host = host.into();
        let message = format!(
            "Failed to connect to {}:{} (timeout: {}s)",
            host, port, timeout_secs
        );
        Elios4YouError::Connection {
            host,
            port,
            timeout_secs,
            message,
        }
    }

    /// Create a connection error with a custom message
    pub fn connection_with_message<S: Into<String>, M: Into<String>>(
        host: S,
        port: u16,
        timeout_secs: u64,
        message: M,
    ) -> Self {
        Elios4YouError::Connection {
            host: host.into(),
            port,
            timeout_secs,
            message: message.into(),
        }
    }

    /// Create a command error with the default message
    pub fn command<S: Into<String>>(command: S) -> Self {
        let command = command.into();
        let message = format!("Command '{}' failed", command);
        Elios4YouError::Command { command, message }
    }

    /// Create a command error with a custom message
    pub fn command_with_message<S: Into<String>, M: Into<String>>(command: S, message: M) -> Self {
        Elios4YouError::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Elios4YouError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Elios4YouError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        Elios4YouError::Web {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Elios4YouError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Elios4YouError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Elios4YouError::Generic {
            message: message.into(),
        }
    }

    /// Whether this is a transport-level failure
    pub fn is_connection(&self) -> bool {
        matches!(self, Elios4YouError::Connection { .. })
    }

    /// Whether this is a command-level failure
    pub fn is_command(&self) -> bool {
        matches!(self, Elios4YouError::Command { .. })
    }

    /// Classify for failure tracking. Anything that is not a command failure
    /// is treated as the device being unreachable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Elios4YouError::Command { .. } => ErrorKind::DeviceNotResponding,
            _ => ErrorKind::DeviceUnreachable,
        }
    }
}

impl From<std::io::Error> for Elios4YouError {
    fn from(err: std::io::Error) -> Self {
        Elios4YouError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for Elios4YouError {
    fn from(err: serde_yaml::Error) -> Self {
        Elios4YouError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Elios4YouError {
    fn from(err: serde_json::Error) -> Self {
        Elios4YouError::Serialization {
            message: err.to_string(),
        }
    }
}
