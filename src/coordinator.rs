//! Scheduled polling with failure tracking
//!
//! [`PollCoordinator`] calls the client on a fixed interval and keeps track
//! of consecutive failed cycles. Once failures reach the configured
//! threshold an outage is escalated: a repair issue is raised, a device event
//! is broadcast and an optional recovery command runs. The first successful
//! cycle afterwards clears the issue and broadcasts a recovery event.

use crate::client::Elios4YouClient;
use crate::config::PollingConfig;
use crate::error::{ErrorKind, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::snapshot::DeviceSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as ProcessCommand;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{MissedTickBehavior, interval, timeout};

/// What the coordinator polls
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run one poll cycle
    async fn refresh(&self) -> Result<()>;

    /// Latest published snapshot
    fn snapshot(&self) -> Arc<DeviceSnapshot>;
}

#[async_trait]
impl DataSource for Elios4YouClient {
    async fn refresh(&self) -> Result<()> {
        self.get_data().await
    }

    fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.data()
    }
}

/// Operator-facing alert raised when an outage is escalated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairIssue {
    pub kind: ErrorKind,
    pub device_name: String,
    pub host: String,
    pub port: u16,
    pub since: DateTime<Local>,
}

/// Device-level events for automations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    DeviceUnreachable {
        device_name: String,
        error: String,
    },
    DeviceNotResponding {
        device_name: String,
        error: String,
    },
    DeviceRecovered {
        device_name: String,
        previous_failures: u32,
        downtime_seconds: u64,
    },
}

/// Published coordinator state
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStatus {
    pub last_update_success: bool,
    pub last_update_time: Option<DateTime<Local>>,
    pub update_interval_secs: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// Set once the failure threshold is crossed, until the next success
    pub issue_active: bool,
    /// Published only when repair notifications are enabled
    pub repair_issue: Option<RepairIssue>,
    pub recovery_executed: bool,
}

#[derive(Default)]
struct Tracker {
    status: CoordinatorStatus,
    outage_started: Option<Instant>,
    outage_started_at: Option<DateTime<Local>>,
}

/// Drives periodic polls of one device
pub struct PollCoordinator {
    source: Arc<dyn DataSource>,
    device_name: String,
    host: String,
    port: u16,
    polling: PollingConfig,
    tracker: Mutex<Tracker>,
    status_tx: watch::Sender<CoordinatorStatus>,
    events_tx: broadcast::Sender<DeviceEvent>,
    logger: StructuredLogger,
}

impl PollCoordinator {
    /// Coordinator for a real client
    pub fn new(client: Arc<Elios4YouClient>, polling: &PollingConfig) -> Self {
        let name = client.name().to_string();
        let host = client.host().to_string();
        let port = client.port();
        Self::with_source(client, &name, &host, port, polling)
    }

    /// Coordinator over any data source
    pub fn with_source(
        source: Arc<dyn DataSource>,
        device_name: &str,
        host: &str,
        port: u16,
        polling: &PollingConfig,
    ) -> Self {
        let interval_secs = polling.effective_scan_interval().as_secs();
        let logger = get_logger_with_context(
            LogContext::new("coordinator")
                .with_device(device_name)
                .with_field("interval_secs", interval_secs.to_string()),
        );
        let initial = CoordinatorStatus {
            // Nothing has failed yet
            last_update_success: true,
            update_interval_secs: interval_secs,
            ..CoordinatorStatus::default()
        };
        let (status_tx, _) = watch::channel(initial.clone());
        let (events_tx, _) = broadcast::channel(32);
        logger.debug(&format!(
            "Coordinator initialized for {}:{} every {}s",
            host, port, interval_secs
        ));

        Self {
            source,
            device_name: device_name.to_string(),
            host: host.to_string(),
            port,
            polling: polling.clone(),
            tracker: Mutex::new(Tracker {
                status: initial,
                ..Tracker::default()
            }),
            status_tx,
            events_tx,
            logger,
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.polling.effective_scan_interval()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.source.snapshot()
    }

    /// Run one poll cycle now and update failure tracking
    pub async fn refresh(&self) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        self.logger.debug("Update started");

        let result = self.source.refresh().await;
        match &result {
            Ok(()) => self.on_success(&mut tracker),
            Err(e) => {
                self.logger.debug(&format!("Coordinator update error: {}", e));
                self.on_failure(&mut tracker, e.kind(), &e.to_string()).await;
            }
        }
        self.status_tx.send_replace(tracker.status.clone());
        result
    }

    fn on_success(&self, tracker: &mut Tracker) {
        let status = &mut tracker.status;
        if status.issue_active {
            let downtime = tracker
                .outage_started
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0);
            let previous_failures = status.consecutive_failures;
            self.logger.info(&format!(
                "{} recovered after {} ({} failed updates, down since {})",
                self.device_name,
                format_downtime(downtime),
                previous_failures,
                tracker
                    .outage_started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ));
            self.emit(DeviceEvent::DeviceRecovered {
                device_name: self.device_name.clone(),
                previous_failures,
                downtime_seconds: downtime,
            });
        }

        status.last_update_success = true;
        status.last_update_time = Some(Local::now());
        status.consecutive_failures = 0;
        status.last_error = None;
        status.last_error_kind = None;
        status.issue_active = false;
        status.repair_issue = None;
        status.recovery_executed = false;
        tracker.outage_started = None;
        tracker.outage_started_at = None;
        self.logger.debug("Update completed");
    }

    async fn on_failure(&self, tracker: &mut Tracker, kind: ErrorKind, error: &str) {
        if tracker.outage_started.is_none() {
            tracker.outage_started = Some(Instant::now());
            tracker.outage_started_at = Some(Local::now());
        }
        let since = tracker.outage_started_at.unwrap_or_else(Local::now);

        let status = &mut tracker.status;
        status.last_update_success = false;
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.last_error = Some(error.to_string());
        status.last_error_kind = Some(kind);
        self.logger.warn(&format!(
            "Update failed ({} consecutive, {}): {}",
            status.consecutive_failures, kind, error
        ));

        if status.consecutive_failures >= self.polling.failures_threshold && !status.issue_active {
            status.issue_active = true;
            if self.polling.enable_repair_notification {
                self.logger.error(&format!(
                    "{} at {}:{} is {}; raising repair issue",
                    self.device_name, self.host, self.port, kind
                ));
                status.repair_issue = Some(RepairIssue {
                    kind,
                    device_name: self.device_name.clone(),
                    host: self.host.clone(),
                    port: self.port,
                    since,
                });
            } else {
                self.logger
                    .debug("Failure threshold reached, repair notifications disabled");
            }
            let event = match kind {
                ErrorKind::DeviceUnreachable => DeviceEvent::DeviceUnreachable {
                    device_name: self.device_name.clone(),
                    error: error.to_string(),
                },
                ErrorKind::DeviceNotResponding => DeviceEvent::DeviceNotResponding {
                    device_name: self.device_name.clone(),
                    error: error.to_string(),
                },
            };
            self.emit(event);
        }

        if status.issue_active
            && !status.recovery_executed
            && let Some(command) = self.polling.recovery_command.as_deref()
        {
            status.recovery_executed = self.run_recovery(command).await;
        }
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Run the recovery command through `sh -c`. Returns whether it exited
    /// successfully; failures are logged only.
    async fn run_recovery(&self, command: &str) -> bool {
        self.logger
            .info(&format!("Executing recovery command: {}", command));
        let child = ProcessCommand::new("sh")
            .arg("-c")
            .arg(command)
            .env("ELIOS4YOU_NAME", &self.device_name)
            .env("ELIOS4YOU_HOST", &self.host)
            .env("ELIOS4YOU_PORT", self.port.to_string())
            .kill_on_drop(true)
            .status();

        let limit = Duration::from_secs(self.polling.recovery_timeout_secs);
        match timeout(limit, child).await {
            Ok(Ok(exit)) if exit.success() => {
                self.logger.info("Recovery command completed");
                true
            }
            Ok(Ok(exit)) => {
                self.logger
                    .error(&format!("Recovery command failed with {}", exit));
                false
            }
            Ok(Err(e)) => {
                self.logger
                    .error(&format!("Recovery command could not start: {}", e));
                false
            }
            Err(_) => {
                self.logger.error(&format!(
                    "Recovery command timed out after {}s",
                    limit.as_secs()
                ));
                false
            }
        }
    }

    /// Poll on the configured interval until `shutdown` turns true or its
    /// sender is dropped. An update still in flight at that point is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.update_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are tracked and logged by refresh
                    let stop = tokio::select! {
                        _ = self.refresh() => false,
                        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                    };
                    if stop {
                        self.logger.info("Shutdown signal received during update");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }
    }
}

/// Human-readable outage length: `59s`, `1m 30s`, `2h 2m`
pub fn format_downtime(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    if seconds < 3600 {
        let (minutes, secs) = (seconds / 60, seconds % 60);
        return if secs > 0 {
            format!("{}m {}s", minutes, secs)
        } else {
            format!("{}m", minutes)
        };
    }
    let (hours, minutes) = (seconds / 3600, (seconds % 3600) / 60);
    if minutes > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}h", hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Elios4YouError;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted poll results; succeeds once the script runs out
    struct ScriptedSource {
        results: StdMutex<VecDeque<Result<()>>>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        async fn refresh(&self) -> Result<()> {
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        fn snapshot(&self) -> Arc<DeviceSnapshot> {
            Arc::new(DeviceSnapshot::default())
        }
    }

    fn unreachable() -> Result<()> {
        Err(Elios4YouError::connection("192.168.1.50", 5001, 5))
    }

    fn not_responding() -> Result<()> {
        Err(Elios4YouError::command("@dat"))
    }

    fn coordinator(source: Arc<ScriptedSource>, polling: PollingConfig) -> PollCoordinator {
        PollCoordinator::with_source(source, "Elios4you", "192.168.1.50", 5001, &polling)
    }

    #[test]
    fn test_format_downtime() {
        assert_eq!(format_downtime(0), "0s");
        assert_eq!(format_downtime(59), "59s");
        assert_eq!(format_downtime(60), "1m");
        assert_eq!(format_downtime(90), "1m 30s");
        assert_eq!(format_downtime(125), "2m 5s");
        assert_eq!(format_downtime(3599), "59m 59s");
        assert_eq!(format_downtime(3600), "1h");
        assert_eq!(format_downtime(3660), "1h 1m");
        assert_eq!(format_downtime(7200), "2h");
        assert_eq!(format_downtime(7320), "2h 2m");
    }

    #[tokio::test]
    async fn test_failures_count_and_reset() {
        let source = ScriptedSource::new(vec![unreachable(), unreachable(), Ok(())]);
        let coordinator = coordinator(source, PollingConfig::default());

        assert!(coordinator.refresh().await.is_err());
        assert_eq!(coordinator.status().consecutive_failures, 1);
        assert!(coordinator.refresh().await.is_err());
        assert_eq!(coordinator.status().consecutive_failures, 2);
        assert!(!coordinator.status().issue_active);

        coordinator.refresh().await.unwrap();
        let status = coordinator.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_update_success);
        assert!(status.last_update_time.is_some());
    }

    #[tokio::test]
    async fn test_threshold_raises_issue_and_event_once() {
        let source = ScriptedSource::new((0..4).map(|_| not_responding()).collect());
        let coordinator = coordinator(source, PollingConfig::default());
        let mut events = coordinator.subscribe_events();

        for _ in 0..4 {
            let _ = coordinator.refresh().await;
        }

        let status = coordinator.status();
        assert!(status.issue_active);
        assert_eq!(status.last_error_kind, Some(ErrorKind::DeviceNotResponding));
        let issue = status.repair_issue.unwrap();
        assert_eq!(issue.kind, ErrorKind::DeviceNotResponding);
        assert_eq!(issue.port, 5001);

        assert!(matches!(
            events.try_recv().unwrap(),
            DeviceEvent::DeviceNotResponding { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_notification_still_tracks_issue() {
        let source = ScriptedSource::new(vec![unreachable()]);
        let polling = PollingConfig {
            failures_threshold: 1,
            enable_repair_notification: false,
            ..PollingConfig::default()
        };
        let coordinator = coordinator(source, polling);

        let _ = coordinator.refresh().await;
        let status = coordinator.status();
        assert!(status.issue_active);
        assert!(status.repair_issue.is_none());
    }

    #[tokio::test]
    async fn test_recovery_fires_recovered_event() {
        let source = ScriptedSource::new(vec![unreachable(), Ok(())]);
        let polling = PollingConfig {
            failures_threshold: 1,
            ..PollingConfig::default()
        };
        let coordinator = coordinator(source, polling);
        let mut events = coordinator.subscribe_events();

        let _ = coordinator.refresh().await;
        coordinator.refresh().await.unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            DeviceEvent::DeviceUnreachable { .. }
        ));
        match events.try_recv().unwrap() {
            DeviceEvent::DeviceRecovered {
                previous_failures,
                device_name,
                ..
            } => {
                assert_eq!(previous_failures, 1);
                assert_eq!(device_name, "Elios4you");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let status = coordinator.status();
        assert!(!status.issue_active);
        assert!(status.repair_issue.is_none());
    }

    #[tokio::test]
    async fn test_recovery_command_runs_once_per_outage() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("runs");
        let polling = PollingConfig {
            failures_threshold: 1,
            recovery_command: Some(format!("echo run >> {}", marker.display())),
            recovery_timeout_secs: 5,
            ..PollingConfig::default()
        };
        let source = ScriptedSource::new(vec![unreachable(), unreachable(), unreachable()]);
        let coordinator = coordinator(source, polling);

        for _ in 0..3 {
            let _ = coordinator.refresh().await;
        }

        assert!(coordinator.status().recovery_executed);
        let runs = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_recovery_command_is_not_marked_executed() {
        let polling = PollingConfig {
            failures_threshold: 1,
            recovery_command: Some("exit 3".to_string()),
            recovery_timeout_secs: 5,
            ..PollingConfig::default()
        };
        let source = ScriptedSource::new(vec![unreachable()]);
        let coordinator = coordinator(source, polling);

        let _ = coordinator.refresh().await;
        assert!(!coordinator.status().recovery_executed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = ScriptedSource::new(vec![]);
        let coordinator = Arc::new(coordinator(source, PollingConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(coordinator.clone().run(shutdown_rx));
        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(coordinator.status().last_update_time.is_some());
    }

    /// Never finishes a poll
    struct HangingSource;

    #[async_trait]
    impl DataSource for HangingSource {
        async fn refresh(&self) -> Result<()> {
            std::future::pending().await
        }

        fn snapshot(&self) -> Arc<DeviceSnapshot> {
            Arc::new(DeviceSnapshot::default())
        }
    }

    #[tokio::test]
    async fn test_run_stops_while_update_in_flight() {
        let coordinator = Arc::new(PollCoordinator::with_source(
            Arc::new(HangingSource),
            "Elios4you",
            "192.168.1.50",
            5001,
            &PollingConfig::default(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(coordinator.clone().run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // The abandoned update is not counted either way
        let status = coordinator.status();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_update_time.is_none());
    }
}
