//! Elios4you device client
//!
//! [`Elios4YouClient`] owns one connection to one monitor and serializes every
//! exchange on it behind a single async mutex: a poll cycle and a relay
//! change never interleave on the socket. Published state is a
//! [`DeviceSnapshot`] behind a `watch` channel, updated after each successful
//! cycle and immediately after a confirmed relay change.

use crate::config::{Config, ConnectionConfig, DeviceConfig};
use crate::connection::{ConnectionManager, Connector, TcpConnector};
use crate::error::{Elios4YouError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::protocol::{
    Command, Frame, FrameTimeouts, ParsedResponse, RelayState, encode_command, parse_response,
    read_frame,
};
use crate::retry::{CommandChannel, RetryPolicy};
use crate::snapshot::DeviceSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, timeout, timeout_at};

/// Connection plus the state mutated under the client lock
pub struct Session {
    conn: ConnectionManager,
    snapshot: DeviceSnapshot,
    timeouts: FrameTimeouts,
    retry: RetryPolicy,
    /// Set while an operation runs; still set on entry means the previous
    /// operation was cancelled mid-exchange
    interrupted: bool,
    logger: StructuredLogger,
}

enum RelayOutcome {
    Confirmed(i64),
    Mismatch(i64),
    SetFailed,
    NoReadback,
}

impl Session {
    fn new(conn: ConnectionManager, settings: &ConnectionConfig, logger: StructuredLogger) -> Self {
        Self {
            conn,
            snapshot: DeviceSnapshot::default(),
            timeouts: FrameTimeouts {
                overall: settings.command_timeout(),
                chunk: settings.chunk_timeout(),
            },
            retry: RetryPolicy::new(settings.retry_count, settings.retry_delay()),
            interrupted: false,
            logger,
        }
    }

    async fn begin(&mut self) {
        if self.interrupted {
            self.logger
                .debug("Previous exchange was interrupted, discarding connection");
            self.conn.safe_close().await;
        }
        self.interrupted = true;
    }

    fn finish(&mut self) {
        self.interrupted = false;
    }

    /// Run `cmd` under the retry policy, turning exhaustion into a command
    /// error tagged with the command token
    async fn fetch(&mut self, cmd: Command) -> Result<ParsedResponse> {
        let retry = self.retry;
        retry.run(self, &cmd).await?.ok_or_else(|| {
            Elios4YouError::command_with_message(
                cmd.token(),
                format!("Failed to retrieve {} data", cmd.token()),
            )
        })
    }

    async fn poll_cycle(&mut self) -> Result<()> {
        self.conn.ensure_connected().await?;

        self.logger.debug("Fetching device data");
        let dat = self.fetch(Command::Dat).await?;
        self.snapshot.apply_dat(&dat);

        let sta = self.fetch(Command::Sta).await?;
        self.snapshot.apply_sta(&sta);

        let inf = self.fetch(Command::Inf).await?;
        self.snapshot.apply_inf(&inf);

        self.snapshot.recompute_derived();
        Ok(())
    }

    async fn relay_cycle(&mut self, target: RelayState, readback_key: &str) -> Result<RelayOutcome> {
        self.conn.ensure_connected().await?;

        let retry = self.retry;
        if retry
            .run(self, &Command::SetRelay(target))
            .await?
            .is_none()
        {
            return Ok(RelayOutcome::SetFailed);
        }

        let readback = match retry.run(self, &Command::Rel).await? {
            Some(parsed) if !parsed.is_empty() => parsed,
            _ => return Ok(RelayOutcome::NoReadback),
        };
        self.logger.debug(&format!("Relay readback: {:?}", readback));

        let raw = readback.get(readback_key).ok_or_else(|| {
            Elios4YouError::command_with_message(
                "@rel",
                format!("Relay readback has no '{}' key", readback_key),
            )
        })?;
        let value: i64 = raw.trim().parse().map_err(|_| {
            Elios4YouError::command_with_message(
                "@rel",
                format!("Relay readback '{}' is not a number", raw),
            )
        })?;

        if value == target.as_int() {
            self.snapshot.relay_state = value;
            Ok(RelayOutcome::Confirmed(value))
        } else {
            Ok(RelayOutcome::Mismatch(value))
        }
    }
}

#[async_trait]
impl CommandChannel for Session {
    async fn send_command(&mut self, cmd: &Command) -> Option<ParsedResponse> {
        let timeouts = self.timeouts;
        let (stream, pending) = match self.conn.io() {
            Ok(io) => io,
            Err(e) => {
                self.logger.debug(&format!("Cannot send {}: {}", cmd, e));
                return None;
            }
        };

        self.logger.debug(&format!("Sending command {}", cmd));
        let bytes = encode_command(cmd);
        // One deadline covers the write and the read
        let deadline = Instant::now() + timeouts.overall;
        let written = timeout_at(deadline, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.logger.debug(&format!("Write of {} failed: {}", cmd, e));
                return None;
            }
            Err(_) => {
                self.logger.debug(&format!("Write of {} timed out", cmd));
                return None;
            }
        }

        let remaining = FrameTimeouts {
            overall: deadline.saturating_duration_since(Instant::now()),
            chunk: timeouts.chunk,
        };
        match read_frame(&mut *stream, pending, remaining).await {
            Ok(Frame::Complete(text)) => {
                let parsed = parse_response(cmd, &text);
                self.logger.debug(&format!(
                    "Command {} answered with {} keys",
                    cmd,
                    parsed.len()
                ));
                Some(parsed)
            }
            Ok(Frame::Incomplete(partial)) => {
                self.logger.debug(&format!(
                    "Incomplete response to {} ({} bytes without terminator)",
                    cmd,
                    partial.len()
                ));
                None
            }
            Ok(Frame::TimedOut) => {
                self.logger.debug(&format!("No response to {}", cmd));
                None
            }
            Err(e) => {
                self.logger.debug(&format!("Read of {} failed: {}", cmd, e));
                None
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn.safe_close().await;
        self.conn.ensure_connected().await
    }
}

/// Client for one Elios4you monitor
pub struct Elios4YouClient {
    name: String,
    host: String,
    port: u16,
    settings: ConnectionConfig,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<Arc<DeviceSnapshot>>,
    logger: StructuredLogger,
}

impl Elios4YouClient {
    /// Create a client using plain TCP
    pub fn new(device: &DeviceConfig, settings: &ConnectionConfig) -> Self {
        Self::with_connector(device, settings, Arc::new(TcpConnector))
    }

    /// Create a client from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.device, &config.connection)
    }

    /// Create a client with a custom connector
    pub fn with_connector(
        device: &DeviceConfig,
        settings: &ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("client")
                .with_device(&device.name)
                .with_field("host", device.host.clone()),
        );
        let conn = ConnectionManager::with_connector(&device.host, device.port, settings, connector);
        let session = Session::new(conn, settings, logger.clone());
        let (snapshot_tx, _) = watch::channel(Arc::new(DeviceSnapshot::default()));

        Self {
            name: device.name.clone(),
            host: device.host.clone(),
            port: device.port,
            settings: settings.clone(),
            session: Mutex::new(session),
            snapshot_tx,
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Latest published snapshot
    pub fn data(&self) -> Arc<DeviceSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<DeviceSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self, snapshot: &DeviceSnapshot) {
        self.snapshot_tx.send_replace(Arc::new(snapshot.clone()));
    }

    /// Run one full poll cycle (`@dat`, `@sta`, `@inf`).
    ///
    /// On any error the connection is closed. Connection and command errors
    /// are returned as they are; anything else is reported as a command error
    /// tagged `get_data`.
    pub async fn get_data(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.begin().await;

        let result = session.poll_cycle().await;
        let outcome = match result {
            Ok(()) => {
                session.conn.touch();
                self.publish(&session.snapshot);
                self.logger.debug("Data fetch completed successfully");
                Ok(())
            }
            Err(e) => {
                session.conn.safe_close().await;
                Err(self.classify(e))
            }
        };
        session.finish();
        outcome
    }

    fn classify(&self, err: Elios4YouError) -> Elios4YouError {
        match err {
            e @ (Elios4YouError::Connection { .. } | Elios4YouError::Command { .. }) => e,
            e @ (Elios4YouError::Io { .. } | Elios4YouError::Timeout { .. }) => {
                self.logger
                    .debug(&format!("Connection or operation timed out: {}", e));
                Elios4YouError::connection_with_message(
                    self.host.clone(),
                    self.port,
                    self.settings.connect_timeout_secs,
                    format!("Connection error: {}", e),
                )
            }
            e => {
                self.logger
                    .error(&format!("Unexpected error during data fetch: {}", e));
                Elios4YouError::command_with_message("get_data", format!("Unexpected error: {}", e))
            }
        }
    }

    /// Switch the relay and confirm the change by reading it back.
    ///
    /// `state` must be "on" or "off" (any case). Returns `true` only when the
    /// readback matches the requested state.
    pub async fn set_relay(&self, state: &str) -> bool {
        let target: RelayState = match state.parse() {
            Ok(target) => target,
            Err(_) => {
                self.logger
                    .warn(&format!("Ignoring invalid relay state '{}'", state));
                return false;
            }
        };

        let mut session = self.session.lock().await;
        session.begin().await;

        let readback_key = self.settings.relay_readback_key.as_str();
        let confirmed = match session.relay_cycle(target, readback_key).await {
            Ok(RelayOutcome::Confirmed(value)) => {
                session.conn.touch();
                // Only the relay field changes; the rest stays as last published
                self.snapshot_tx.send_modify(|published| {
                    Arc::make_mut(published).relay_state = value;
                });
                self.logger.info(&format!("Relay set to {} (rel={})", target.as_str(), value));
                true
            }
            Ok(RelayOutcome::Mismatch(value)) => {
                session.conn.touch();
                self.logger.warn(&format!(
                    "Relay did not switch {}: device reports rel={}",
                    target.as_str(),
                    value
                ));
                false
            }
            Ok(RelayOutcome::SetFailed) => {
                self.logger.debug("Set relay command failed after retries");
                session.conn.safe_close().await;
                false
            }
            Ok(RelayOutcome::NoReadback) => {
                self.logger.debug("Relay readback failed after retries");
                session.conn.safe_close().await;
                false
            }
            Err(e) => {
                self.logger.debug(&format!("Set relay failed: {}", e));
                session.conn.safe_close().await;
                false
            }
        };
        session.finish();
        confirmed
    }

    /// Run a single command and return its parsed answer
    pub async fn query(&self, cmd: Command) -> Result<ParsedResponse> {
        let mut session = self.session.lock().await;
        session.begin().await;

        let result = async {
            session.conn.ensure_connected().await?;
            session.fetch(cmd).await
        }
        .await;
        match &result {
            Ok(_) => session.conn.touch(),
            Err(_) => session.conn.safe_close().await,
        }
        session.finish();
        result
    }

    /// Release the connection
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        session.conn.safe_close().await;
        session.finish();
    }

    /// Check whether the device port accepts connections, on a separate
    /// short-lived socket
    pub async fn check_port(&self) -> bool {
        let port_timeout = self.settings.check_port_timeout();
        match timeout(port_timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(mut stream)) => {
                let _ = stream.shutdown().await;
                self.logger
                    .debug(&format!("Port open on {}:{}", self.host, self.port));
                true
            }
            Ok(Err(e)) => {
                self.logger.debug(&format!(
                    "Port not available on {}:{}: {}",
                    self.host, self.port, e
                ));
                false
            }
            Err(_) => {
                self.logger.debug(&format!(
                    "Port check on {}:{} timed out after {}s",
                    self.host,
                    self.port,
                    port_timeout.as_secs()
                ));
                false
            }
        }
    }
}

impl std::fmt::Debug for Elios4YouClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elios4YouClient")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_relay_state_is_rejected_without_connecting() {
        let device = DeviceConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..DeviceConfig::default()
        };
        let client = Elios4YouClient::new(&device, &ConnectionConfig::default());
        assert!(!client.set_relay("toggle").await);
        assert!(!client.session.lock().await.conn.is_open());
    }

    #[tokio::test]
    async fn test_initial_data_is_sentinel_snapshot() {
        let client = Elios4YouClient::new(&DeviceConfig::default(), &ConnectionConfig::default());
        let data = client.data();
        assert_eq!(data.relay_state, 1);
        assert_eq!(data.manufact, "4-noks");
        assert_eq!(client.name(), "Elios4you");
    }

    /// Hands out one prepared in-memory stream
    struct OnceConnector(std::sync::Mutex<Option<tokio::io::DuplexStream>>);

    #[async_trait]
    impl Connector for OnceConnector {
        async fn connect(
            &self,
            _host: &str,
            _port: u16,
        ) -> std::io::Result<Box<dyn crate::connection::DeviceStream>> {
            match self.0.lock().unwrap().take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(std::io::Error::other("already connected")),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_write_eats_into_read_budget() {
        use tokio::io::AsyncReadExt;

        // One-byte pipe: the write only completes once the peer starts reading
        let (ours, mut peer) = tokio::io::duplex(1);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(600)).await;
            let mut sink = Vec::new();
            let _ = peer.read_to_end(&mut sink).await;
        });

        let settings = ConnectionConfig {
            command_timeout_secs: 1,
            chunk_timeout_ms: 1000,
            ..ConnectionConfig::default()
        };
        let connector = Arc::new(OnceConnector(std::sync::Mutex::new(Some(ours))));
        let conn = ConnectionManager::with_connector("127.0.0.1", 5001, &settings, connector);
        let mut session = Session::new(conn, &settings, crate::logging::get_logger("test"));
        session.conn.ensure_connected().await.unwrap();

        let started = std::time::Instant::now();
        assert!(session.send_command(&Command::Dat).await.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(600));
        assert!(
            elapsed < std::time::Duration::from_millis(1400),
            "round-trip took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_classify_wraps_unexpected_errors() {
        let client = Elios4YouClient::new(&DeviceConfig::default(), &ConnectionConfig::default());

        let err = client.classify(Elios4YouError::generic("boom"));
        match err {
            Elios4YouError::Command { command, message } => {
                assert_eq!(command, "get_data");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = client.classify(Elios4YouError::timeout("read"));
        assert!(err.is_connection());

        let err = client.classify(Elios4YouError::command("@sta"));
        assert!(matches!(err, Elios4YouError::Command { ref command, .. } if command == "@sta"));
    }
}
