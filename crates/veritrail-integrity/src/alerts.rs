//! Durable, deduplicated alerts.
//!
//! Alerts are stored per log under `alert:{id}`. While an alert is
//! unacknowledged, an `open:{key}` index entry points at it, and raising the
//! same [`AlertKey`] again bumps `occurrences` instead of emitting a new
//! alert. Acknowledging removes the index entry; alerts are never cleared by
//! a later healthy check.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use veritrail_storage::ScopedKvStore;

use crate::error::{IntegrityError, IntegrityResult};
use crate::event::LogId;
use crate::severity::Severity;
use crate::state::StateStore;

const ALERTS_PREFIX: &str = "veritrail:alerts";
const ALERT_KEY_PREFIX: &str = "alert:";
// First key after every `alert:` key.
const ALERT_KEY_END: &str = "alert;";

/// Default capacity of the broadcast channel.
pub const DEFAULT_ALERT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which monitor check raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCheck {
    /// Hash-chain failure rate.
    Verification,
    /// Sequence gap count.
    SequenceGaps,
    /// Duplicate sequences.
    Duplicates,
    /// Timestamp regressions.
    OrderViolations,
    /// Corruption ratio.
    Corruption,
}

impl AlertCheck {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::SequenceGaps => "sequence_gaps",
            Self::Duplicates => "duplicates",
            Self::OrderViolations => "order_violations",
            Self::Corruption => "corruption",
        }
    }
}

impl fmt::Display for AlertCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable deduplication key: check type plus affected range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    /// Check that raised the alert.
    pub check: AlertCheck,
    /// First affected sequence.
    pub start: u64,
    /// Last affected sequence.
    pub end: u64,
}

impl AlertKey {
    /// Create a key.
    #[must_use]
    pub const fn new(check: AlertCheck, start: u64, end: u64) -> Self {
        Self { check, start, end }
    }

    fn index_key(&self) -> String {
        format!("open:{}:{:020}:{:020}", self.check, self.start, self.end)
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..={}]", self.check, self.start, self.end)
    }
}

/// Who acknowledged an alert, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Operator.
    pub by: String,
    /// Free-form note.
    pub note: Option<String>,
    /// When.
    pub at: DateTime<Utc>,
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: Uuid,
    /// Log the alert concerns.
    pub log_id: LogId,
    /// Deduplication key.
    pub key: AlertKey,
    /// Highest severity seen across occurrences.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// Measured value at the latest occurrence.
    pub measured: f64,
    /// Threshold that was exceeded.
    pub threshold: f64,
    /// First occurrence.
    pub first_raised_at: DateTime<Utc>,
    /// Latest occurrence.
    pub last_raised_at: DateTime<Utc>,
    /// Number of times the breach was observed.
    pub occurrences: u64,
    /// Set once acknowledged.
    pub acknowledged: Option<Acknowledgement>,
}

impl Alert {
    /// Whether the alert still awaits acknowledgement.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.acknowledged.is_none()
    }
}

/// A threshold breach to raise.
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Deduplication key.
    pub key: AlertKey,
    /// Severity.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// Measured value.
    pub measured: f64,
    /// Threshold exceeded.
    pub threshold: f64,
    /// Deliver only to these channels; empty means every sink.
    pub channels: Vec<String>,
}

/// What [`AlertManager::raise`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    /// A new alert was stored and delivered.
    Raised(Alert),
    /// An open alert with the same key absorbed the occurrence.
    Deduplicated(Alert),
}

impl RaiseOutcome {
    /// The stored alert.
    #[must_use]
    pub fn alert(&self) -> &Alert {
        match self {
            Self::Raised(alert) | Self::Deduplicated(alert) => alert,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Delivery channel for newly raised alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Channel name, as used in configuration.
    fn name(&self) -> &str;

    /// Deliver an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails. Delivery failures never undo the
    /// stored alert.
    async fn deliver(&self, alert: &Alert) -> IntegrityResult<()>;
}

/// Writes alerts to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> IntegrityResult<()> {
        if alert.severity >= Severity::High {
            error!(
                alert_id = %alert.id,
                log_id = %alert.log_id,
                key = %alert.key,
                severity = %alert.severity,
                measured = alert.measured,
                threshold = alert.threshold,
                "{}", alert.message
            );
        } else {
            warn!(
                alert_id = %alert.id,
                log_id = %alert.log_id,
                key = %alert.key,
                severity = %alert.severity,
                measured = alert.measured,
                threshold = alert.threshold,
                "{}", alert.message
            );
        }
        Ok(())
    }
}

/// Publishes alerts on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastAlertSink {
    sender: broadcast::Sender<Arc<Alert>>,
}

impl BroadcastAlertSink {
    /// Create a channel holding up to `capacity` undelivered alerts.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive alerts raised from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Alert>> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastAlertSink {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}

#[async_trait]
impl AlertSink for BroadcastAlertSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn deliver(&self, alert: &Alert) -> IntegrityResult<()> {
        // No receivers is not a failure.
        if let Ok(count) = self.sender.send(Arc::new(alert.clone())) {
            debug!(alert_id = %alert.id, receivers = count, "Alert broadcast");
        } else {
            trace!(alert_id = %alert.id, "No alert subscribers");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Raises, lists and acknowledges alerts.
pub struct AlertManager {
    state: StateStore,
    sinks: Vec<Arc<dyn AlertSink>>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field(
                "sinks",
                &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl AlertManager {
    /// Create a manager with no sinks.
    #[must_use]
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            sinks: Vec::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Add a delivery channel.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Names of the configured sinks.
    #[must_use]
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    fn namespace(&self, log: &LogId) -> IntegrityResult<ScopedKvStore> {
        self.state.scoped(ALERTS_PREFIX, log)
    }

    /// Raise an alert, or absorb it into the open alert with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn raise(&self, log: &LogId, alert: NewAlert) -> IntegrityResult<RaiseOutcome> {
        let ns = self.namespace(log)?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let index_key = alert.key.index_key();
        if let Some(open_id) = ns.get_json::<Uuid>(&index_key).await?
            && let Some(mut existing) = ns.get_json::<Alert>(&alert_key(&open_id)).await?
            && existing.is_open()
        {
            existing.occurrences = existing.occurrences.saturating_add(1);
            existing.last_raised_at = now;
            existing.measured = alert.measured;
            existing.severity = existing.severity.max(alert.severity);
            ns.set_json(&alert_key(&existing.id), &existing).await?;
            debug!(
                alert_id = %existing.id,
                log_id = %log,
                key = %existing.key,
                occurrences = existing.occurrences,
                "Alert deduplicated"
            );
            return Ok(RaiseOutcome::Deduplicated(existing));
        }

        let stored = Alert {
            id: Uuid::new_v4(),
            log_id: log.clone(),
            key: alert.key,
            severity: alert.severity,
            message: alert.message,
            measured: alert.measured,
            threshold: alert.threshold,
            first_raised_at: now,
            last_raised_at: now,
            occurrences: 1,
            acknowledged: None,
        };
        ns.set_json(&alert_key(&stored.id), &stored).await?;
        ns.set_json(&index_key, &stored.id).await?;
        info!(
            alert_id = %stored.id,
            log_id = %log,
            key = %stored.key,
            severity = %stored.severity,
            "Alert raised"
        );

        let channels = alert.channels;
        for sink in self
            .sinks
            .iter()
            .filter(|s| channels.is_empty() || channels.iter().any(|c| c == s.name()))
        {
            if let Err(e) = sink.deliver(&stored).await {
                error!(sink = sink.name(), alert_id = %stored.id, error = %e, "Alert delivery failed");
            }
        }
        Ok(RaiseOutcome::Raised(stored))
    }

    /// One alert.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::NotFound`] if no such alert exists.
    pub async fn get(&self, log: &LogId, id: Uuid) -> IntegrityResult<Alert> {
        self.namespace(log)?
            .get_json(&alert_key(&id))
            .await?
            .ok_or_else(|| IntegrityError::NotFound(format!("alert {id} in log {log}")))
    }

    /// Alerts of `log`, oldest first. Acknowledged alerts are included only
    /// when `include_acknowledged` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self, log: &LogId, include_acknowledged: bool) -> IntegrityResult<Vec<Alert>> {
        let ns = self.namespace(log)?;
        let entries = ns
            .store()
            .range(ns.namespace(), ALERT_KEY_PREFIX, Some(ALERT_KEY_END))
            .await?;

        let mut alerts = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_slice::<Alert>(&entry.value) {
                Ok(alert) if include_acknowledged || alert.is_open() => alerts.push(alert),
                Ok(_) => {},
                Err(e) => warn!(key = %entry.key, error = %e, "Skipping undecodable alert"),
            }
        }
        alerts.sort_by_key(|a| (a.first_raised_at, a.id));
        Ok(alerts)
    }

    /// Acknowledge an open alert.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::NotFound`] for an unknown alert and
    /// [`IntegrityError::Validation`] if it was already acknowledged.
    pub async fn acknowledge(
        &self,
        log: &LogId,
        id: Uuid,
        by: &str,
        note: Option<String>,
    ) -> IntegrityResult<Alert> {
        if by.trim().is_empty() {
            return Err(IntegrityError::Validation(
                "acknowledging operator must be named".into(),
            ));
        }
        let ns = self.namespace(log)?;
        let _guard = self.write_lock.lock().await;

        let mut alert: Alert = ns
            .get_json(&alert_key(&id))
            .await?
            .ok_or_else(|| IntegrityError::NotFound(format!("alert {id} in log {log}")))?;
        if let Some(ack) = &alert.acknowledged {
            return Err(IntegrityError::Validation(format!(
                "alert {id} was already acknowledged by {} at {}",
                ack.by, ack.at
            )));
        }

        alert.acknowledged = Some(Acknowledgement {
            by: by.to_owned(),
            note,
            at: Utc::now(),
        });
        ns.set_json(&alert_key(&id), &alert).await?;

        let index_key = alert.key.index_key();
        if ns.get_json::<Uuid>(&index_key).await? == Some(id) {
            ns.delete(&index_key).await?;
        }
        info!(alert_id = %id, log_id = %log, by, "Alert acknowledged");
        Ok(alert)
    }
}

fn alert_key(id: &Uuid) -> String {
    format!("{ALERT_KEY_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritrail_storage::MemoryKvStore;

    fn manager() -> (AlertManager, BroadcastAlertSink) {
        let state = StateStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        let broadcast = BroadcastAlertSink::new(8);
        let manager = AlertManager::new(state)
            .with_sink(Arc::new(LogAlertSink))
            .with_sink(Arc::new(broadcast.clone()));
        (manager, broadcast)
    }

    fn log() -> LogId {
        LogId::new("payments").unwrap()
    }

    fn breach(start: u64, end: u64) -> NewAlert {
        NewAlert {
            key: AlertKey::new(AlertCheck::SequenceGaps, start, end),
            severity: Severity::High,
            message: "2 gaps".into(),
            measured: 2.0,
            threshold: 0.0,
            channels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_raise_delivers_to_subscribers() {
        let (manager, broadcast) = manager();
        let mut rx = broadcast.subscribe();

        let outcome = manager.raise(&log(), breach(1, 100)).await.unwrap();
        assert!(matches!(outcome, RaiseOutcome::Raised(_)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, outcome.alert().id);
        assert_eq!(manager.sink_names(), vec!["log", "broadcast"]);
    }

    #[tokio::test]
    async fn test_same_key_is_deduplicated_until_acknowledged() {
        let (manager, broadcast) = manager();
        let mut rx = broadcast.subscribe();

        let first = manager.raise(&log(), breach(1, 100)).await.unwrap();
        let mut again = breach(1, 100);
        again.severity = Severity::Critical;
        let second = manager.raise(&log(), again).await.unwrap();

        let RaiseOutcome::Deduplicated(alert) = second else {
            panic!("expected deduplication");
        };
        assert_eq!(alert.id, first.alert().id);
        assert_eq!(alert.occurrences, 2);
        assert_eq!(alert.severity, Severity::Critical);
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());

        manager
            .acknowledge(&log(), alert.id, "ops", Some("ticket INC-7".into()))
            .await
            .unwrap();
        let third = manager.raise(&log(), breach(1, 100)).await.unwrap();
        assert!(matches!(third, RaiseOutcome::Raised(_)));
        assert_ne!(third.alert().id, alert.id);
    }

    #[tokio::test]
    async fn test_channel_filter() {
        let (manager, broadcast) = manager();
        let mut rx = broadcast.subscribe();
        let mut alert = breach(1, 5);
        alert.channels = vec!["log".into()];
        manager.raise(&log(), alert).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_different_ranges_are_distinct() {
        let (manager, _) = manager();
        manager.raise(&log(), breach(1, 100)).await.unwrap();
        let other = manager.raise(&log(), breach(101, 200)).await.unwrap();
        assert!(matches!(other, RaiseOutcome::Raised(_)));
        assert_eq!(manager.list(&log(), false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_twice_is_rejected() {
        let (manager, _) = manager();
        let id = manager.raise(&log(), breach(1, 10)).await.unwrap().alert().id;

        let acked = manager.acknowledge(&log(), id, "ops", None).await.unwrap();
        assert_eq!(acked.acknowledged.as_ref().unwrap().by, "ops");

        let again = manager.acknowledge(&log(), id, "ops", None).await;
        assert!(matches!(again, Err(IntegrityError::Validation(_))));

        assert!(manager.list(&log(), false).await.unwrap().is_empty());
        assert_eq!(manager.list(&log(), true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_alert() {
        let (manager, _) = manager();
        let result = manager.acknowledge(&log(), Uuid::new_v4(), "ops", None).await;
        assert!(matches!(result, Err(IntegrityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_acknowledge_requires_operator() {
        let (manager, _) = manager();
        let id = manager.raise(&log(), breach(1, 10)).await.unwrap().alert().id;
        let result = manager.acknowledge(&log(), id, "  ", None).await;
        assert!(matches!(result, Err(IntegrityError::Validation(_))));
    }
}
