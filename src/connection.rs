//! Connection management for the Elios4you TCP port
//!
//! A single logical socket is kept per device and reused while it stays open
//! and has been active within the reuse window. Every failure path closes it
//! so the next attempt starts from a fresh socket.

use crate::config::ConnectionConfig;
use crate::error::{Elios4YouError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Byte stream to the device
pub trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens streams to a host/port, abstracted so tests can count opens
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<Box<dyn DeviceStream>>;
}

/// Plain TCP connector
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<Box<dyn DeviceStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        // Commands are tiny; don't let Nagle hold them back
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Owner of the single socket to one device
pub struct ConnectionManager {
    host: String,
    port: u16,
    settings: ConnectionConfig,
    connector: Arc<dyn Connector>,
    stream: Option<Box<dyn DeviceStream>>,
    /// Bytes received after the last terminator
    pending: Vec<u8>,
    /// `None` when closed
    last_activity: Option<Instant>,
    logger: StructuredLogger,
}

impl ConnectionManager {
    /// Create a manager that opens plain TCP connections
    pub fn new(host: &str, port: u16, settings: &ConnectionConfig) -> Self {
        Self::with_connector(host, port, settings, Arc::new(TcpConnector))
    }

    /// Create a manager with a custom connector
    pub fn with_connector(
        host: &str,
        port: u16,
        settings: &ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("connection").with_field("endpoint", format!("{}:{}", host, port)),
        );
        Self {
            host: host.to_string(),
            port,
            settings: settings.clone(),
            connector,
            stream: None,
            pending: Vec::new(),
            last_activity: None,
            logger,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether a socket is currently held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Time since the last recorded activity, if open
    pub fn idle_time(&self) -> Option<Duration> {
        self.last_activity.map(|t| t.elapsed())
    }

    /// Whether the held socket may be reused: open and active within the
    /// reuse window
    pub fn is_connection_valid(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.idle_time() {
            Some(idle) if idle <= self.settings.reuse_timeout() => true,
            Some(idle) => {
                self.logger.debug(&format!(
                    "Connection expired after {:.1}s idle, will reconnect",
                    idle.as_secs_f64()
                ));
                false
            }
            None => false,
        }
    }

    /// Reuse the current socket if valid, otherwise replace it
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connection_valid() {
            self.logger.debug("Reusing existing connection");
            self.touch();
            return Ok(());
        }

        self.safe_close().await;

        self.logger.debug(&format!(
            "Opening new connection to {}:{}",
            self.host, self.port
        ));
        let connect_timeout = self.settings.connect_timeout();
        let cause = match timeout(connect_timeout, self.connector.connect(&self.host, self.port))
            .await
        {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.pending.clear();
                self.touch();
                self.logger.debug("Connection established");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}s", connect_timeout.as_secs()),
        };

        self.logger.debug(&format!("Connection failed: {}", cause));
        Err(Elios4YouError::connection_with_message(
            self.host.clone(),
            self.port,
            self.settings.connect_timeout_secs,
            format!("Connection failed: {}", cause),
        ))
    }

    /// Close the socket, never failing. Pending bytes are drained and both
    /// directions shut down on a best-effort basis.
    pub async fn safe_close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            self.logger.debug("No connection to close");
            return;
        };

        let drain_timeout = self.settings.drain_timeout();
        let mut scratch = [0u8; 512];
        let _ = timeout(drain_timeout, async {
            loop {
                match stream.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        let _ = timeout(drain_timeout, stream.shutdown()).await;
        drop(stream);

        self.pending.clear();
        self.last_activity = None;
        self.logger.debug("Connection closed and cleaned up");
    }

    /// Record activity on the current socket
    pub fn touch(&mut self) {
        if self.is_open() {
            self.last_activity = Some(Instant::now());
        }
    }

    /// Socket and carry-over buffer for one round-trip
    pub(crate) fn io(&mut self) -> Result<(&mut (dyn DeviceStream + 'static), &mut Vec<u8>)> {
        let host = self.host.clone();
        let port = self.port;
        let timeout_secs = self.settings.connect_timeout_secs;
        match self.stream.as_mut() {
            Some(stream) => Ok((stream.as_mut(), &mut self.pending)),
            None => Err(Elios4YouError::connection_with_message(
                host,
                port,
                timeout_secs,
                "Not connected",
            )),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .field("idle", &self.idle_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out in-memory duplex streams and counts opens
    struct CountingConnector {
        opens: AtomicUsize,
        fail: bool,
    }

    impl CountingConnector {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _host: &str, _port: u16) -> std::io::Result<Box<dyn DeviceStream>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                ));
            }
            // The far end is dropped, which the manager sees as EOF on drain
            let (near, _far) = tokio::io::duplex(64);
            Ok(Box::new(near))
        }
    }

    fn settings(reuse_secs: u64) -> ConnectionConfig {
        ConnectionConfig {
            reuse_timeout_secs: reuse_secs,
            drain_timeout_ms: 10,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ensure_connected_reuses_within_window() {
        let connector = CountingConnector::new(false);
        let mut manager =
            ConnectionManager::with_connector("127.0.0.1", 5001, &settings(25), connector.clone());

        manager.ensure_connected().await.unwrap();
        manager.ensure_connected().await.unwrap();

        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert!(manager.is_connection_valid());
    }

    #[tokio::test]
    async fn test_expired_connection_is_replaced() {
        let connector = CountingConnector::new(false);
        let mut manager =
            ConnectionManager::with_connector("127.0.0.1", 5001, &settings(1), connector.clone());

        manager.ensure_connected().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!manager.is_connection_valid());

        manager.ensure_connected().await.unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let connector = CountingConnector::new(true);
        let mut manager =
            ConnectionManager::with_connector("10.0.0.9", 5001, &settings(25), connector);

        let err = manager.ensure_connected().await.unwrap_err();
        match err {
            Elios4YouError::Connection {
                host,
                port,
                timeout_secs,
                message,
            } => {
                assert_eq!(host, "10.0.0.9");
                assert_eq!(port, 5001);
                assert_eq!(timeout_secs, 5);
                assert!(message.starts_with("Connection failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!manager.is_open());
    }

    #[tokio::test]
    async fn test_safe_close_is_idempotent() {
        let connector = CountingConnector::new(false);
        let mut manager =
            ConnectionManager::with_connector("127.0.0.1", 5001, &settings(25), connector);

        manager.safe_close().await;
        manager.ensure_connected().await.unwrap();
        manager.safe_close().await;
        manager.safe_close().await;

        assert!(!manager.is_open());
        assert!(manager.idle_time().is_none());
        assert!(manager.io().is_err());
    }
}
