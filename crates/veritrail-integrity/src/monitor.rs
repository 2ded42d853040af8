//! Background integrity monitor.
//!
//! One monitor task per log. Each tick runs, for whichever checks are due,
//! an incremental chain verification, a gap / duplicate / order audit and a
//! sampled corruption scan, each starting at its own checkpoint and covering
//! at most `max_range_per_tick` sequences. Checkpoints advance only after a
//! check completes, to the last sequence it actually processed.
//!
//! ```text
//! Idle -> Checking -> Healthy | Degraded | AlertRaised -> Idle
//! ```
//!
//! A monitor never leaves `AlertRaised` while unacknowledged alerts remain,
//! and the transition out of it is journaled.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use veritrail_telemetry::RequestContext;

use crate::accessor::EventAccessor;
use crate::alerts::{AlertCheck, AlertKey, AlertManager, NewAlert, RaiseOutcome};
use crate::capability::{AuditSequence, DetectCorruption, VerifyChain};
use crate::error::{IntegrityError, IntegrityResult};
use crate::event::LogId;
use crate::journal::{NewOperation, OperationJournal, OperationKind};
use crate::options::CheckOptions;
use crate::scanner::CorruptionCriteria;
use crate::sequence::OrderCriteria;
use crate::severity::Severity;
use crate::state::{MonitorCheckpoints, StateStore};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Alert thresholds. A check breaches when its measured value is strictly
/// greater than the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Invalid or missing hashes over sequences covered.
    pub hash_failure_rate: f64,
    /// Number of gaps found in one audit.
    pub gap_count: u64,
    /// Corrupted events over events scanned.
    pub corruption_ratio: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            hash_failure_rate: 0.0,
            gap_count: 0,
            corruption_ratio: 0.01,
        }
    }
}

/// Retry behaviour for operational failures within a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per check, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Per-log monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Between incremental chain verifications.
    pub verification_interval_ms: u64,
    /// Between gap / duplicate / order audits.
    pub sequence_interval_ms: u64,
    /// Between sampled corruption scans.
    pub corruption_interval_ms: u64,
    /// Fraction of events the corruption scan examines.
    pub sample_rate: f64,
    /// Sequences one check covers per tick.
    pub max_range_per_tick: u64,
    /// Events fetched per accessor call.
    pub batch_size: u64,
    /// Alert thresholds.
    pub thresholds: AlertThresholds,
    /// Alert channels; empty means every configured sink.
    pub channels: Vec<String>,
    /// Retry behaviour.
    pub retry: RetryPolicy,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self::from(&veritrail_config::IntegrityConfig::default())
    }
}

impl From<&veritrail_config::IntegrityConfig> for MonitoringConfig {
    fn from(config: &veritrail_config::IntegrityConfig) -> Self {
        let m = &config.monitoring;
        Self {
            verification_interval_ms: m.verification_interval_secs.saturating_mul(1000),
            sequence_interval_ms: m.sequence_interval_secs.saturating_mul(1000),
            corruption_interval_ms: m.corruption_interval_secs.saturating_mul(1000),
            sample_rate: m.sample_rate,
            max_range_per_tick: m.max_range_per_tick,
            batch_size: config.verification.batch_size,
            thresholds: AlertThresholds {
                hash_failure_rate: m.thresholds.hash_failure_rate,
                gap_count: m.thresholds.gap_count,
                corruption_ratio: m.thresholds.corruption_ratio,
            },
            channels: m.channels.clone(),
            retry: RetryPolicy {
                max_attempts: m.retry.max_attempts,
                initial_backoff_ms: m.retry.initial_backoff_ms,
                max_backoff_ms: m.retry.max_backoff_ms,
            },
        }
    }
}

impl MonitoringConfig {
    /// Check bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] naming the first bad field.
    pub fn validate(&self) -> IntegrityResult<()> {
        let invalid = |msg: &str| Err(IntegrityError::Validation(format!("monitoring: {msg}")));
        if self.verification_interval_ms == 0
            || self.sequence_interval_ms == 0
            || self.corruption_interval_ms == 0
        {
            return invalid("intervals must be positive");
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 || self.sample_rate > 1.0 {
            return invalid("sample_rate must be in (0, 1]");
        }
        if self.max_range_per_tick == 0 || self.batch_size == 0 {
            return invalid("max_range_per_tick and batch_size must be at least 1");
        }
        for rate in [self.thresholds.hash_failure_rate, self.thresholds.corruption_ratio] {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return invalid("rate thresholds must be in [0, 1]");
            }
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Monitor state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// A tick is running.
    Checking,
    /// The last tick found nothing over threshold.
    Healthy,
    /// The last tick could not complete every check.
    Degraded,
    /// Unacknowledged alerts are open.
    AlertRaised,
}

impl MonitorState {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::AlertRaised => "alert_raised",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live status of a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Log monitored.
    pub log_id: LogId,
    /// Current phase.
    pub state: MonitorState,
    /// Outcome of the last completed tick.
    pub last_outcome: Option<MonitorState>,
    /// The task is running.
    pub running: bool,
    /// Completed ticks.
    pub ticks: u64,
    /// When the last tick completed.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Checkpoints after the last tick.
    pub checkpoints: MonitorCheckpoints,
    /// Last operational failure.
    pub last_error: Option<String>,
}

impl MonitorStatus {
    fn new(log_id: LogId) -> Self {
        Self {
            log_id,
            state: MonitorState::Idle,
            last_outcome: None,
            running: false,
            ticks: 0,
            last_tick_at: None,
            checkpoints: MonitorCheckpoints::default(),
            last_error: None,
        }
    }
}

/// Which checks a tick runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueChecks {
    /// Incremental chain verification.
    pub verification: bool,
    /// Gap / duplicate / order audit.
    pub sequence: bool,
    /// Sampled corruption scan.
    pub corruption: bool,
}

impl DueChecks {
    /// Every check.
    pub const ALL: Self = Self {
        verification: true,
        sequence: true,
        corruption: true,
    };
    const VERIFICATION: Self = Self {
        verification: true,
        sequence: false,
        corruption: false,
    };
    const SEQUENCE: Self = Self {
        verification: false,
        sequence: true,
        corruption: false,
    };
    const CORRUPTION: Self = Self {
        verification: false,
        sequence: false,
        corruption: true,
    };
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Outcome state.
    pub outcome: MonitorState,
    /// Checkpoints after the tick.
    pub checkpoints: MonitorCheckpoints,
    /// Alerts raised or bumped.
    pub alerts: Vec<RaiseOutcome>,
    /// Checks that failed, with the error.
    pub failures: Vec<(AlertCheck, String)>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Components a monitor drives.
#[derive(Clone)]
pub struct MonitorComponents {
    /// Latest-sequence lookups.
    pub accessor: Arc<dyn EventAccessor>,
    /// Chain verification.
    pub verifier: Arc<dyn VerifyChain>,
    /// Sequence audits.
    pub auditor: Arc<dyn AuditSequence>,
    /// Corruption scans.
    pub scanner: Arc<dyn DetectCorruption>,
    /// Alert persistence and delivery.
    pub alerts: Arc<AlertManager>,
    /// Heads and checkpoints.
    pub state: StateStore,
    /// Transition journal.
    pub journal: Arc<dyn OperationJournal>,
}

impl fmt::Debug for MonitorComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorComponents").finish_non_exhaustive()
    }
}

/// Monitor for one log.
pub struct IntegrityMonitor {
    log: LogId,
    config: MonitoringConfig,
    components: MonitorComponents,
    status: watch::Sender<MonitorStatus>,
}

impl fmt::Debug for IntegrityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityMonitor")
            .field("log", &self.log)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IntegrityMonitor {
    /// Create a monitor. Nothing runs until [`IntegrityMonitor::spawn`] or
    /// [`IntegrityMonitor::tick`].
    #[must_use]
    pub fn new(log: LogId, config: MonitoringConfig, components: MonitorComponents) -> Self {
        let (status, _) = watch::channel(MonitorStatus::new(log.clone()));
        Self {
            log,
            config,
            components,
            status,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    fn set_state(&self, state: MonitorState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Start the background task.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let monitor = Arc::new(self);
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let status = monitor.status.subscribe();
        let log = monitor.log.clone();
        let span = tracing::info_span!("monitor", log_id = %log);
        let task = tokio::spawn(
            Arc::clone(&monitor)
                .run(cancel.clone(), Arc::clone(&wake))
                .instrument(span),
        );
        MonitorHandle {
            log,
            cancel,
            wake,
            status,
            task,
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, wake: Arc<Notify>) {
        let every = |ms: u64| {
            let mut interval = tokio::time::interval(Duration::from_millis(ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        };
        let mut verification = every(self.config.verification_interval_ms);
        let mut sequence = every(self.config.sequence_interval_ms);
        let mut corruption = every(self.config.corruption_interval_ms);

        self.status.send_modify(|s| s.running = true);
        info!(log_id = %self.log, "Integrity monitor started");

        loop {
            let due = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = wake.notified() => DueChecks::ALL,
                _ = verification.tick() => DueChecks::VERIFICATION,
                _ = sequence.tick() => DueChecks::SEQUENCE,
                _ = corruption.tick() => DueChecks::CORRUPTION,
            };

            let opts = CheckOptions::new()
                .with_cancel(cancel.child_token())
                .with_batch_size(self.config.batch_size);
            if let Err(e) = self.tick(due, &opts).await {
                error!(log_id = %self.log, error = %e, "Monitor tick failed");
                self.status.send_modify(|s| {
                    s.state = MonitorState::Idle;
                    s.last_outcome = Some(MonitorState::Degraded);
                    s.last_error = Some(e.to_string());
                });
            }
        }

        self.status.send_modify(|s| {
            s.running = false;
            s.state = MonitorState::Idle;
        });
        info!(log_id = %self.log, "Integrity monitor stopped");
    }

    /// Run the due checks once.
    ///
    /// Check failures are absorbed into the report and leave the state
    /// `Degraded`; errors are returned only when alert or state persistence
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails.
    pub async fn tick(&self, due: DueChecks, opts: &CheckOptions) -> IntegrityResult<TickReport> {
        let ctx = RequestContext::new("monitor")
            .with_log_id(self.log.as_str())
            .with_initiator("monitor")
            .with_operation("monitor_tick");
        let span = ctx.span();
        self.tick_inner(&ctx, due, opts).instrument(span).await
    }

    async fn tick_inner(
        &self,
        ctx: &RequestContext,
        due: DueChecks,
        opts: &CheckOptions,
    ) -> IntegrityResult<TickReport> {
        self.set_state(MonitorState::Checking);
        let state = &self.components.state;
        let mut checkpoints = state.checkpoints(&self.log).await?;
        let mut breaches = Vec::new();
        let mut failures = Vec::new();

        if due.verification {
            match self.check_verification(&mut checkpoints, opts).await {
                Ok(found) => breaches.extend(found),
                Err(e) => failures.push((AlertCheck::Verification, e.to_string())),
            }
        }
        if due.sequence {
            match self.check_sequence(&mut checkpoints, opts).await {
                Ok(found) => breaches.extend(found),
                Err(e) => failures.push((AlertCheck::SequenceGaps, e.to_string())),
            }
        }
        if due.corruption {
            match self.check_corruption(&mut checkpoints, opts).await {
                Ok(found) => breaches.extend(found),
                Err(e) => failures.push((AlertCheck::Corruption, e.to_string())),
            }
        }

        let mut alerts = Vec::with_capacity(breaches.len());
        for breach in breaches {
            alerts.push(self.components.alerts.raise(&self.log, breach).await?);
        }

        let open = self.components.alerts.list(&self.log, false).await?;
        let outcome = if !open.is_empty() {
            MonitorState::AlertRaised
        } else if !failures.is_empty() {
            MonitorState::Degraded
        } else {
            MonitorState::Healthy
        };

        let previous = state.monitor_record(&self.log).await?.map(|r| r.state);
        if previous == Some(MonitorState::AlertRaised) && outcome != MonitorState::AlertRaised {
            self.components
                .journal
                .record(
                    ctx,
                    NewOperation::succeeded(
                        self.log.clone(),
                        OperationKind::MonitorTransition,
                        format!("{} -> {outcome}: all alerts acknowledged", MonitorState::AlertRaised),
                    ),
                )
                .await?;
        }
        state.set_monitor_state(&self.log, outcome).await?;

        for (check, err) in &failures {
            warn!(log_id = %self.log, check = %check, error = %err, "Monitor check failed");
        }
        info!(
            log_id = %self.log,
            outcome = %outcome,
            alerts = alerts.len(),
            failures = failures.len(),
            verification = checkpoints.verification,
            sequence = checkpoints.sequence,
            corruption = checkpoints.corruption,
            "Monitor tick complete"
        );

        let last_error = failures.last().map(|(_, e)| e.clone());
        self.status.send_modify(|s| {
            s.state = MonitorState::Idle;
            s.last_outcome = Some(outcome);
            s.ticks = s.ticks.saturating_add(1);
            s.last_tick_at = Some(Utc::now());
            s.checkpoints = checkpoints.clone();
            if last_error.is_some() {
                s.last_error = last_error;
            }
        });

        Ok(TickReport {
            outcome,
            checkpoints,
            alerts,
            failures,
        })
    }

    async fn check_verification(
        &self,
        checkpoints: &mut MonitorCheckpoints,
        opts: &CheckOptions,
    ) -> IntegrityResult<Vec<NewAlert>> {
        let state = &self.components.state;
        let from = checkpoints.verification;
        let head = state.chain_head(&self.log).await?;
        let seed = head
            .as_ref()
            .filter(|h| h.sequence == from)
            .map(|h| h.running_hash);

        let result = self
            .retry("verification", opts, || {
                self.components.verifier.verify_from(
                    &self.log,
                    from,
                    seed,
                    Some(self.config.max_range_per_tick),
                    opts,
                )
            })
            .await?;
        if result.is_empty() {
            return Ok(Vec::new());
        }

        state.advance_head(&self.log, &result, from == 0).await?;
        checkpoints.verification = result.end_sequence;
        state.put_checkpoints(&self.log, checkpoints).await?;

        let rate = result.failure_rate();
        if rate <= self.config.thresholds.hash_failure_rate {
            return Ok(Vec::new());
        }
        let severity = result
            .broken_chains
            .iter()
            .map(|s| s.severity)
            .max()
            .unwrap_or(Severity::High);
        Ok(vec![self.alert(
            AlertKey::new(AlertCheck::Verification, result.start_sequence, result.end_sequence),
            severity,
            format!(
                "{} broken span(s), {} invalid and {} missing hash(es)",
                result.broken_chains.len(),
                result.hashes_invalid,
                result.hashes_missing
            ),
            rate,
            self.config.thresholds.hash_failure_rate,
        )])
    }

    #[allow(clippy::cast_precision_loss)]
    async fn check_sequence(
        &self,
        checkpoints: &mut MonitorCheckpoints,
        opts: &CheckOptions,
    ) -> IntegrityResult<Vec<NewAlert>> {
        let Some((start, end)) = self.next_range(checkpoints.sequence, opts).await? else {
            return Ok(Vec::new());
        };
        let auditor = &self.components.auditor;

        let gaps = self
            .retry("gaps", opts, || auditor.gaps(&self.log, start, end, opts))
            .await?;
        let duplicates = self
            .retry("duplicates", opts, || auditor.duplicates(&self.log, start, end, opts))
            .await?;
        // Start one earlier so the first new sequence is compared with its predecessor.
        let order_start = start.saturating_sub(1).max(1);
        let order = self
            .retry("order", opts, || {
                auditor.order(&self.log, OrderCriteria::new(order_start, end), opts)
            })
            .await?;

        checkpoints.sequence = gaps.end.min(duplicates.end).min(order.end);
        self.components
            .state
            .put_checkpoints(&self.log, checkpoints)
            .await?;

        let mut breaches = Vec::new();
        let gap_count = u64::try_from(gaps.findings.len()).unwrap_or(u64::MAX);
        if gap_count > self.config.thresholds.gap_count {
            let severity = gaps.findings.iter().map(|g| g.severity).max().unwrap_or(Severity::Medium);
            let missing: u64 = gaps.findings.iter().map(|g| g.gap_size).fold(0, u64::saturating_add);
            breaches.push(self.alert(
                AlertKey::new(AlertCheck::SequenceGaps, gaps.start, gaps.end),
                severity,
                format!("{gap_count} gap(s), {missing} missing sequence(s)"),
                gap_count as f64,
                self.config.thresholds.gap_count as f64,
            ));
        }
        if !duplicates.is_clean() {
            let severity = duplicates.findings.iter().map(|d| d.severity).max().unwrap_or(Severity::Medium);
            breaches.push(self.alert(
                AlertKey::new(AlertCheck::Duplicates, duplicates.start, duplicates.end),
                severity,
                format!("{} duplicated sequence(s)", duplicates.findings.len()),
                duplicates.findings.len() as f64,
                0.0,
            ));
        }
        if !order.is_clean() {
            let severity = order.findings.iter().map(|o| o.severity).max().unwrap_or(Severity::Medium);
            breaches.push(self.alert(
                AlertKey::new(AlertCheck::OrderViolations, order.start, order.end),
                severity,
                format!("{} timestamp regression(s)", order.findings.len()),
                order.findings.len() as f64,
                0.0,
            ));
        }
        Ok(breaches)
    }

    async fn check_corruption(
        &self,
        checkpoints: &mut MonitorCheckpoints,
        opts: &CheckOptions,
    ) -> IntegrityResult<Vec<NewAlert>> {
        let Some((start, end)) = self.next_range(checkpoints.corruption, opts).await? else {
            return Ok(Vec::new());
        };
        let criteria = CorruptionCriteria::new(start, end)
            .with_statistical()
            .with_sample_rate(self.config.sample_rate);

        let report = self
            .retry("corruption", opts, || {
                self.components.scanner.scan(&self.log, &criteria, opts)
            })
            .await?;
        checkpoints.corruption = report.end;
        self.components
            .state
            .put_checkpoints(&self.log, checkpoints)
            .await?;

        if report.corruption_ratio <= self.config.thresholds.corruption_ratio {
            return Ok(Vec::new());
        }
        let severity = report
            .confirmed()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::Medium);
        Ok(vec![self.alert(
            AlertKey::new(AlertCheck::Corruption, report.start, report.end),
            severity,
            format!(
                "{} of {} sampled events corrupted ({:?})",
                report.corrupted_events, report.events_scanned, report.level
            ),
            report.corruption_ratio,
            self.config.thresholds.corruption_ratio,
        )])
    }

    /// Next range after `checkpoint`, bounded by the latest sequence and
    /// `max_range_per_tick`.
    async fn next_range(
        &self,
        checkpoint: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<Option<(u64, u64)>> {
        let (accessor, log) = (&self.components.accessor, &self.log);
        let latest = self
            .retry("latest_sequence", opts, || async move {
                Ok(accessor.get_latest_sequence(log).await?)
            })
            .await?;
        let Some(latest) = latest else {
            return Ok(None);
        };
        let start = checkpoint.saturating_add(1);
        let end = latest.min(checkpoint.saturating_add(self.config.max_range_per_tick));
        Ok((start <= end).then_some((start, end)))
    }

    fn alert(
        &self,
        key: AlertKey,
        severity: Severity,
        message: String,
        measured: f64,
        threshold: f64,
    ) -> NewAlert {
        NewAlert {
            key,
            severity,
            message,
            measured,
            threshold,
            channels: self.config.channels.clone(),
        }
    }

    /// Run `op`, retrying retryable errors with exponential backoff.
    async fn retry<T, F, Fut>(&self, check: &str, opts: &CheckOptions, mut op: F) -> IntegrityResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IntegrityResult<T>>,
    {
        let policy = &self.config.retry;
        let max_backoff = Duration::from_millis(policy.max_backoff_ms);
        let mut delay = Duration::from_millis(policy.initial_backoff_ms).min(max_backoff);
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    warn!(
                        log_id = %self.log,
                        check,
                        attempt,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying check"
                    );
                    match &opts.cancel {
                        Some(cancel) => {
                            tokio::select! {
                                () = cancel.cancelled() => return Err(e),
                                () = tokio::time::sleep(delay) => {},
                            }
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    delay = delay.saturating_mul(2).min(max_backoff);
                    attempt = attempt.saturating_add(1);
                },
                Err(e) => {
                    debug!(log_id = %self.log, check, attempt, error = %e, "Check failed");
                    return Err(e);
                },
            }
        }
    }
}

/// Handle to a running monitor.
pub struct MonitorHandle {
    log: LogId,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    status: watch::Receiver<MonitorStatus>,
    task: JoinHandle<()>,
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl MonitorHandle {
    /// Log monitored.
    #[must_use]
    pub fn log_id(&self) -> &LogId {
        &self.log
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    /// Run every check now instead of waiting for the intervals.
    pub fn notify_new_events(&self) {
        self.wake.notify_one();
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop scheduling ticks and wait for the task. An in-flight tick sees
    /// the cancellation between events and checkpoints what it covered.
    pub async fn stop(self) -> MonitorStatus {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(log_id = %self.log, error = %e, "Monitor task panicked");
        }
        self.status.borrow().clone()
    }
}
