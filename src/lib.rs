//! # Elios4you - poller and relay control for 4-noks Elios4you monitors
//!
//! The Elios4you energy monitor exposes a line-oriented TCP protocol on port
//! 5001. This crate keeps one connection per device, polls it on a schedule,
//! publishes a typed snapshot of the readings and switches its relay.
//!
//! ## Architecture
//!
//! - `protocol`: command encoding, `ready...` framing and response parsing
//! - `connection`: single reusable socket with expiry and safe close
//! - `retry`: bounded retries with reconnect between attempts
//! - `client`: poll cycle, relay control and published snapshot
//! - `snapshot`: typed device readings and derived values
//! - `coordinator`: scheduled polling, failure escalation and recovery events
//! - `entities`: sensor and switch descriptors for presentation
//! - `diagnostics`: redacted diagnostics export
//! - `web`: local HTTP API
//! - `config`: YAML configuration and validation
//! - `logging`: structured logging and tracing

pub mod client;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod diagnostics;
pub mod entities;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod retry;
pub mod snapshot;
#[cfg(feature = "web")]
pub mod web;


/// Build version, including the nightly tag when built as one
pub const VERSION: &str = env!("APP_VERSION");

// Re-export commonly used types
pub use client::Elios4YouClient;
pub use config::Config;
pub use coordinator::PollCoordinator;
pub use error::{Elios4YouError, Result};
