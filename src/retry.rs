//! Bounded retry-with-reconnect around single command round-trips

use crate::error::Result;
use crate::logging::get_logger;
use crate::protocol::{Command, ParsedResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Something that can run one command round-trip and rebuild its transport
#[async_trait]
pub trait CommandChannel: Send {
    /// One round-trip. `None` is a soft failure worth retrying.
    async fn send_command(&mut self, cmd: &Command) -> Option<ParsedResponse>;

    /// Drop the current transport and open a fresh one
    async fn reconnect(&mut self) -> Result<()>;
}

/// Retry bound and backoff for command round-trips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause after reconnecting, before the next attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of send attempts this policy allows
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `cmd` until it yields a response or attempts run out.
    ///
    /// `Ok(None)` means every attempt failed softly. A reconnect failure is
    /// a hard error and is returned immediately.
    pub async fn run<C>(&self, channel: &mut C, cmd: &Command) -> Result<Option<ParsedResponse>>
    where
        C: CommandChannel + ?Sized,
    {
        let logger = get_logger("retry");
        for attempt in 0..self.attempts() {
            if let Some(response) = channel.send_command(cmd).await {
                return Ok(Some(response));
            }

            if attempt < self.max_retries {
                logger.debug(&format!(
                    "Command {} failed, retrying (attempt {}/{})",
                    cmd,
                    attempt + 1,
                    self.max_retries
                ));
                channel.reconnect().await?;
                tokio::time::sleep(self.delay).await;
            }
        }

        logger.debug(&format!(
            "Command {} gave no usable response after {} attempts",
            cmd,
            self.attempts()
        ));
        Ok(None)
    }
}
