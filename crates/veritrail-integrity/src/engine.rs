//! The integrity engine facade.
//!
//! [`IntegrityEngine`] composes the verifier, auditor, scanner, repair
//! engine, alert manager, operation journal and per-log monitors behind one
//! API. Every operation takes the caller's [`RequestContext`] and runs
//! inside its span. Operations that mutate persistent state (repair, alert
//! acknowledgement, monitoring setup and teardown) are journaled whether
//! they succeed or fail.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tracing::{Instrument, info, warn};
use uuid::Uuid;
use veritrail_config::IntegrityConfig;
use veritrail_crypto::{KeyId, KeyPair, SignatureVerifier};
use veritrail_storage::KvStore;
use veritrail_telemetry::RequestContext;

use crate::accessor::EventAccessor;
use crate::alerts::{
    Alert, AlertManager, AlertSink, BroadcastAlertSink, DEFAULT_ALERT_CAPACITY, LogAlertSink,
};
use crate::capability::{AuditSequence, DetectCorruption, VerifyChain};
use crate::error::{IntegrityError, IntegrityResult, OperationalError};
use crate::event::{ChainLink, LogId};
use crate::journal::{KvOperationJournal, NewOperation, OperationJournal, OperationKind, OperationRecord};
use crate::ledger::LedgerVerification;
use crate::monitor::{IntegrityMonitor, MonitorComponents, MonitorHandle, MonitorStatus, MonitoringConfig};
use crate::options::{CheckOptions, validate_range};
use crate::report::{IntegrityReport, ReportInputs};
use crate::repair::{RepairEngine, RepairPolicy, RepairRecord, RepairResult};
use crate::scanner::{CorruptionCriteria, CorruptionReport, CorruptionScanner, ScannerSettings};
use crate::sequence::{
    AuditorSettings, DuplicateSequence, OrderCriteria, OrderIssue, SequenceAuditor,
    SequenceFindings, SequenceGap,
};
use crate::state::{ChainHead, MonitorRecord, StateStore};
use crate::verifier::{ChainVerifier, VerificationResult, VerifierSettings};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`IntegrityEngine`].
pub struct IntegrityEngineBuilder {
    accessor: Arc<dyn EventAccessor>,
    store: Arc<dyn KvStore>,
    config: IntegrityConfig,
    keyring: Option<SignatureVerifier>,
    journal: Option<Arc<dyn OperationJournal>>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl fmt::Debug for IntegrityEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityEngineBuilder")
            .field("config", &self.config)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl IntegrityEngineBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: IntegrityConfig) -> Self {
        self.config = config;
        self
    }

    /// Sign repair records with this keyring instead of loading
    /// `repair.key_path`.
    #[must_use]
    pub fn keyring(mut self, keyring: SignatureVerifier) -> Self {
        self.keyring = Some(keyring);
        self
    }

    /// Journal operations here instead of the state store.
    #[must_use]
    pub fn journal(mut self, journal: Arc<dyn OperationJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Deliver alerts to an additional sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid configuration
    /// or duplicate sink names, and
    /// [`OperationalError::KeyMaterial`] if the signing key cannot be
    /// loaded.
    pub fn build(self) -> IntegrityResult<IntegrityEngine> {
        self.config
            .validate()
            .map_err(|e| IntegrityError::Validation(e.to_string()))?;

        let keyring = match self.keyring {
            Some(keyring) => keyring,
            None => SignatureVerifier::new(match &self.config.repair.key_path {
                Some(path) => KeyPair::load_or_generate(path)
                    .map_err(|e| OperationalError::KeyMaterial(e.to_string()))?,
                None => KeyPair::generate(),
            }),
        };

        let state = StateStore::new(Arc::clone(&self.store))?;
        let verifier = Arc::new(ChainVerifier::new(
            Arc::clone(&self.accessor),
            VerifierSettings::from(&self.config),
        ));
        let auditor = Arc::new(SequenceAuditor::new(
            Arc::clone(&self.accessor),
            AuditorSettings::from(&self.config),
        ));
        let scanner = Arc::new(CorruptionScanner::new(
            Arc::clone(&self.accessor),
            ScannerSettings::from(&self.config),
        ));
        let keyring = Arc::new(RwLock::new(keyring));
        let repair = Arc::new(RepairEngine::new(
            Arc::clone(&self.accessor),
            Arc::clone(&verifier),
            state.clone(),
            Arc::clone(&keyring),
            RepairPolicy::from(&self.config),
        ));

        let broadcast = Arc::new(BroadcastAlertSink::new(DEFAULT_ALERT_CAPACITY));
        let mut alerts = AlertManager::new(state.clone())
            .with_sink(Arc::new(LogAlertSink))
            .with_sink(Arc::clone(&broadcast) as Arc<dyn AlertSink>);
        for sink in self.sinks {
            if alerts.sink_names().contains(&sink.name()) {
                return Err(IntegrityError::Validation(format!(
                    "alert sink '{}' is registered twice",
                    sink.name()
                )));
            }
            alerts = alerts.with_sink(sink);
        }

        let journal = self
            .journal
            .unwrap_or_else(|| Arc::new(KvOperationJournal::new(state.clone())));

        info!(
            policy = %repair.policy(),
            sinks = ?alerts.sink_names(),
            "Integrity engine ready"
        );

        Ok(IntegrityEngine {
            config: self.config,
            accessor: self.accessor,
            state,
            verifier,
            auditor,
            scanner,
            repair,
            alerts: Arc::new(alerts),
            broadcast,
            journal,
            keyring,
            monitors: Mutex::new(HashMap::new()),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Integrity operations over one event store.
pub struct IntegrityEngine {
    config: IntegrityConfig,
    accessor: Arc<dyn EventAccessor>,
    state: StateStore,
    verifier: Arc<ChainVerifier>,
    auditor: Arc<SequenceAuditor>,
    scanner: Arc<CorruptionScanner>,
    repair: Arc<RepairEngine>,
    alerts: Arc<AlertManager>,
    broadcast: Arc<BroadcastAlertSink>,
    journal: Arc<dyn OperationJournal>,
    keyring: Arc<RwLock<SignatureVerifier>>,
    monitors: Mutex<HashMap<LogId, MonitorHandle>>,
}

impl fmt::Debug for IntegrityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityEngine")
            .field("policy", &self.repair.policy())
            .finish_non_exhaustive()
    }
}

impl IntegrityEngine {
    /// Start building an engine reading events through `accessor` and
    /// keeping its own state in `store`.
    #[must_use]
    pub fn builder(accessor: Arc<dyn EventAccessor>, store: Arc<dyn KvStore>) -> IntegrityEngineBuilder {
        IntegrityEngineBuilder {
            accessor,
            store,
            config: IntegrityConfig::default(),
            keyring: None,
            journal: None,
            sinks: Vec::new(),
        }
    }

    /// Configuration in force.
    #[must_use]
    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// Default options: configured batch size and deadline.
    #[must_use]
    pub fn check_options(&self) -> CheckOptions {
        let opts = CheckOptions::new().with_batch_size(self.config.verification.batch_size);
        match self.config.verification.deadline_secs {
            0 => opts,
            secs => opts.with_timeout(Duration::from_secs(secs)),
        }
    }

    /// Persisted state.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // -- Verification --

    /// Verify `[start, end]`. A valid verification from genesis that was
    /// not truncated moves the chain head forward.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the stores.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        async {
            let result = self.verifier.verify(log, start, end, opts).await?;
            if start <= 1 && !result.truncated {
                self.state.advance_head(log, &result, true).await?;
            }
            Ok(result)
        }
        .instrument(ctx.span())
        .await
    }

    /// Verify at most `limit` sequences after `from_seq`, seeded from the
    /// chain head when it sits at `from_seq`, and advance the head.
    ///
    /// # Errors
    ///
    /// Returns operational errors from the stores.
    pub async fn verify_incremental(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        from_seq: u64,
        limit: Option<u64>,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        async {
            let seed = self
                .state
                .chain_head(log)
                .await?
                .filter(|h| h.sequence == from_seq)
                .map(|h| h.running_hash);
            let result = self
                .verifier
                .verify_incremental(log, from_seq, seed, limit, opts)
                .await?;
            self.state.advance_head(log, &result, from_seq == 0).await?;
            Ok(result)
        }
        .instrument(ctx.span())
        .await
    }

    /// Verify `windows` evenly spaced windows of `window_len` sequences
    /// across `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range or zero
    /// windows, and operational errors from the accessor.
    pub async fn verify_sample(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        windows: u64,
        window_len: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        self.verifier
            .verify_sample(log, start, end, windows, window_len, opts)
            .instrument(ctx.span())
            .await
    }

    /// Verify `[start, end]` as concurrently verified partitions.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn verify_partitioned(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        async {
            let result = self.verifier.verify_partitioned(log, start, end, opts).await?;
            if start <= 1 && !result.truncated {
                self.state.advance_head(log, &result, true).await?;
            }
            Ok(result)
        }
        .instrument(ctx.span())
        .await
    }

    // -- Repair --

    /// Repair `[start, end]`, journal the outcome and refresh the chain
    /// head if it lies inside the range.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range,
    /// [`OperationalError::Timeout`] if another repair holds an overlapping
    /// range past the deadline, and operational errors from the stores.
    pub async fn repair_hash_chain(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<RepairResult> {
        async {
            let outcome = self.repair.repair_hash_chain(ctx, log, start, end, opts).await;
            let op = match &outcome {
                Ok(result) => NewOperation::succeeded(
                    log.clone(),
                    OperationKind::RepairHashChain,
                    format!(
                        "[{start}, {end}] policy={} applied={} unrepairable={} valid_after={}",
                        result.policy,
                        result.applied(),
                        result.unrepairable.len(),
                        result.success
                    ),
                ),
                Err(e) => NewOperation::failed(
                    log.clone(),
                    OperationKind::RepairHashChain,
                    format!("[{start}, {end}]"),
                    e.to_string(),
                ),
            };
            self.journal.record(ctx, op).await?;

            let result = outcome?;
            if result.applied() > 0 {
                self.refresh_head(log, &result).await?;
            }
            Ok(result)
        }
        .instrument(ctx.span())
        .await
    }

    async fn refresh_head(&self, log: &LogId, result: &RepairResult) -> IntegrityResult<()> {
        let Some(head) = self.state.chain_head(log).await? else {
            return Ok(());
        };
        if !(result.start_sequence..=result.end_sequence).contains(&head.sequence) {
            return Ok(());
        }
        let event = self.accessor.get_event_by_sequence(log, head.sequence).await?;
        let link = ChainLink::from(&event);
        let healthy = head.healthy || (result.success && result.start_sequence <= 1);
        self.state
            .put_chain_head(&ChainHead::from_link(log.clone(), link, link.hash, healthy))
            .await
    }

    /// Signed repair records of `log`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn repair_records(&self, ctx: &RequestContext, log: &LogId) -> IntegrityResult<Vec<RepairRecord>> {
        self.repair.repair_records(log).instrument(ctx.span()).await
    }

    /// Check the links and signatures of `log`'s repair records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn verify_repair_records(
        &self,
        ctx: &RequestContext,
        log: &LogId,
    ) -> IntegrityResult<LedgerVerification> {
        self.repair.verify_repair_records(log).instrument(ctx.span()).await
    }

    /// Make `next` the signing key. The previous key stays trusted for
    /// verifying existing records.
    pub async fn rotate_signing_key(&self, ctx: &RequestContext, next: KeyPair) -> KeyId {
        let span = ctx.span();
        let retired = self.keyring.write().await.rotate(next);
        span.in_scope(|| info!(retired = %retired, "Rotated repair signing key"));
        retired
    }

    // -- Sequence audits --

    /// Maximal runs of missing sequences in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn detect_gaps(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<SequenceGap>> {
        self.auditor
            .detect_gaps(log, start, end, opts)
            .instrument(ctx.span())
            .await
    }

    /// Sequences in `[start, end]` held by more than one event.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn detect_duplicates(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<DuplicateSequence>> {
        self.auditor
            .detect_duplicates(log, start, end, opts)
            .instrument(ctx.span())
            .await
    }

    /// Timestamp regressions beyond the clock-skew tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn validate_order(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        criteria: OrderCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<OrderIssue>> {
        self.auditor
            .validate_order(log, criteria, opts)
            .instrument(ctx.span())
            .await
    }

    /// Scan for field-level corruption.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for invalid criteria and
    /// operational errors from the accessor.
    pub async fn detect_corruption(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        criteria: &CorruptionCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<CorruptionReport> {
        self.scanner
            .detect_corruption(log, criteria, opts)
            .instrument(ctx.span())
            .await
    }

    // -- State --

    /// Latest verified position of `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_chain_head(&self, ctx: &RequestContext, log: &LogId) -> IntegrityResult<Option<ChainHead>> {
        self.state.chain_head(log).instrument(ctx.span()).await
    }

    // -- Alerts --

    /// Alerts of `log`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_alerts(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        include_acknowledged: bool,
    ) -> IntegrityResult<Vec<Alert>> {
        self.alerts
            .list(log, include_acknowledged)
            .instrument(ctx.span())
            .await
    }

    /// Acknowledge an open alert as `by`, and journal the attempt.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::NotFound`] for an unknown alert,
    /// [`IntegrityError::Validation`] for a repeated acknowledgement or an
    /// unnamed operator, and operational errors from the store.
    pub async fn acknowledge_alert(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        alert_id: Uuid,
        by: &str,
        note: Option<String>,
    ) -> IntegrityResult<Alert> {
        async {
            let outcome = self.alerts.acknowledge(log, alert_id, by, note).await;
            let detail = format!("alert {alert_id} by {by}");
            let op = match &outcome {
                Ok(alert) => NewOperation::succeeded(
                    log.clone(),
                    OperationKind::AcknowledgeAlert,
                    format!("{detail} ({} {})", alert.key, alert.severity),
                ),
                Err(e) => NewOperation::failed(
                    log.clone(),
                    OperationKind::AcknowledgeAlert,
                    detail,
                    e.to_string(),
                ),
            };
            self.journal.record(ctx, op).await?;
            outcome
        }
        .instrument(ctx.span())
        .await
    }

    /// New alerts as they are raised, across every log.
    #[must_use]
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Arc<Alert>> {
        self.broadcast.subscribe()
    }

    // -- Monitoring --

    /// Start (or restart with a new configuration) the background monitor
    /// of `log`, persist its configuration and journal the change.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid configuration
    /// or an unknown alert channel, and operational errors from the store.
    pub async fn setup_integrity_monitoring(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        config: MonitoringConfig,
    ) -> IntegrityResult<MonitorStatus> {
        async {
            if let Err(e) = self.check_monitoring(&config) {
                self.journal
                    .record(
                        ctx,
                        NewOperation::failed(
                            log.clone(),
                            OperationKind::SetupMonitoring,
                            "invalid configuration",
                            e.to_string(),
                        ),
                    )
                    .await?;
                return Err(e);
            }

            let previous = self.state.monitor_record(log).await?;
            self.state
                .put_monitor_record(&MonitorRecord {
                    log_id: log.clone(),
                    config: config.clone(),
                    state: previous.map(|r| r.state).unwrap_or_default(),
                    configured_by: ctx.initiator.clone(),
                    configured_at: Utc::now(),
                })
                .await?;
            let status = self.start_monitor(log, config.clone()).await;

            self.journal
                .record(
                    ctx,
                    NewOperation::succeeded(
                        log.clone(),
                        OperationKind::SetupMonitoring,
                        format!(
                            "intervals(ms) verification={} sequence={} corruption={} sample_rate={} channels={:?}",
                            config.verification_interval_ms,
                            config.sequence_interval_ms,
                            config.corruption_interval_ms,
                            config.sample_rate,
                            config.channels
                        ),
                    ),
                )
                .await?;
            info!(log_id = %log, "Integrity monitoring configured");
            Ok(status)
        }
        .instrument(ctx.span())
        .await
    }

    fn check_monitoring(&self, config: &MonitoringConfig) -> IntegrityResult<()> {
        config.validate()?;
        let known = self.alerts.sink_names();
        if let Some(unknown) = config.channels.iter().find(|c| !known.contains(&c.as_str())) {
            return Err(IntegrityError::Validation(format!(
                "unknown alert channel '{unknown}'; configured: {}",
                known.join(", ")
            )));
        }
        Ok(())
    }

    async fn start_monitor(&self, log: &LogId, config: MonitoringConfig) -> MonitorStatus {
        let components = MonitorComponents {
            accessor: Arc::clone(&self.accessor),
            verifier: Arc::clone(&self.verifier) as Arc<dyn VerifyChain>,
            auditor: Arc::clone(&self.auditor) as Arc<dyn AuditSequence>,
            scanner: Arc::clone(&self.scanner) as Arc<dyn DetectCorruption>,
            alerts: Arc::clone(&self.alerts),
            state: self.state.clone(),
            journal: Arc::clone(&self.journal),
        };
        // Held across the stop: at most one monitor runs per log.
        let mut monitors = self.monitors.lock().await;
        if let Some(old) = monitors.remove(log) {
            old.stop().await;
        }
        let handle = IntegrityMonitor::new(log.clone(), config, components).spawn();
        let status = handle.status();
        monitors.insert(log.clone(), handle);
        status
    }

    /// Stop the monitor of `log` and forget its configuration. Checkpoints
    /// are kept. Returns the final status, or `None` if no monitor ran.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn stop_monitoring(&self, ctx: &RequestContext, log: &LogId) -> IntegrityResult<Option<MonitorStatus>> {
        async {
            let handle = self.monitors.lock().await.remove(log);
            let had_record = self.state.delete_monitor_record(log).await?;
            let status = match handle {
                Some(handle) => Some(handle.stop().await),
                None => None,
            };
            if status.is_some() || had_record {
                self.journal
                    .record(
                        ctx,
                        NewOperation::succeeded(
                            log.clone(),
                            OperationKind::StopMonitoring,
                            status
                                .as_ref()
                                .map_or_else(|| "no running monitor".to_owned(), |s| format!("after {} tick(s)", s.ticks)),
                        ),
                    )
                    .await?;
            }
            Ok(status)
        }
        .instrument(ctx.span())
        .await
    }

    /// Restart monitors for every log with persisted monitoring
    /// configuration, e.g. after a process restart. Checkpoints carry over.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn resume_monitoring(&self, ctx: &RequestContext) -> IntegrityResult<Vec<LogId>> {
        async {
            let mut resumed = Vec::new();
            for log in self.state.monitored_logs().await? {
                if self.monitors.lock().await.contains_key(&log) {
                    continue;
                }
                let Some(record) = self.state.monitor_record(&log).await? else {
                    continue;
                };
                if let Err(e) = self.check_monitoring(&record.config) {
                    warn!(log_id = %log, error = %e, "Skipping invalid persisted monitoring config");
                    continue;
                }
                self.start_monitor(&log, record.config).await;
                resumed.push(log);
            }
            info!(count = resumed.len(), "Resumed integrity monitors");
            Ok(resumed)
        }
        .instrument(ctx.span())
        .await
    }

    /// Live status of `log`'s monitor.
    pub async fn monitor_status(&self, log: &LogId) -> Option<MonitorStatus> {
        self.monitors.lock().await.get(log).map(MonitorHandle::status)
    }

    /// A receiver observing every status change of `log`'s monitor.
    pub async fn watch_monitor(&self, log: &LogId) -> Option<watch::Receiver<MonitorStatus>> {
        self.monitors.lock().await.get(log).map(MonitorHandle::watch)
    }

    /// Tell `log`'s monitor new events were appended. Returns `false` when
    /// no monitor runs for the log.
    pub async fn notify_new_events(&self, log: &LogId) -> bool {
        match self.monitors.lock().await.get(log) {
            Some(handle) => {
                handle.notify_new_events();
                true
            },
            None => false,
        }
    }

    /// Stop every monitor, keeping their persisted configuration.
    pub async fn shutdown(&self) {
        let handles: Vec<MonitorHandle> = self.monitors.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
        info!("Integrity engine shut down");
    }

    // -- Reporting and self-audit --

    /// Verify, audit and scan `[start, end]` and summarise the result.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the stores.
    pub async fn generate_integrity_report(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<IntegrityReport> {
        async {
            validate_range(start, end)?;
            let verification = self.verifier.verify(log, start, end, opts).await?;
            let gaps = self.auditor.detect_gaps(log, start, end, opts).await?;
            let duplicates = self.auditor.detect_duplicates(log, start, end, opts).await?;
            let order = self
                .auditor
                .validate_order(log, OrderCriteria::new(start, end), opts)
                .await?;
            let corruption = self
                .scanner
                .detect_corruption(log, &CorruptionCriteria::new(start, end).with_statistical(), opts)
                .await?;

            let truncated = verification.truncated
                || gaps.truncated
                || duplicates.truncated
                || order.truncated
                || corruption.truncated;
            let inputs = ReportInputs {
                verification,
                gaps: gaps.findings,
                duplicates: duplicates.findings,
                order_issues: order.findings,
                corruption,
                chain_head: self.state.chain_head(log).await?,
                open_alerts: self.alerts.list(log, false).await?,
                truncated,
            };
            let report = IntegrityReport::compose(
                log.clone(),
                start,
                end,
                ctx.request_id,
                ctx.correlation_id,
                inputs,
            );
            info!(
                log_id = %log,
                start,
                end,
                status = %report.status,
                recommendations = report.recommendations.len(),
                "Integrity report generated"
            );
            Ok(report)
        }
        .instrument(ctx.span())
        .await
    }

    /// Journal records of `log`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn journal_records(&self, ctx: &RequestContext, log: &LogId) -> IntegrityResult<Vec<OperationRecord>> {
        self.journal.records(log).instrument(ctx.span()).await
    }

    /// Check the hash links of `log`'s journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn verify_journal(&self, ctx: &RequestContext, log: &LogId) -> IntegrityResult<LedgerVerification> {
        self.journal.verify(log).instrument(ctx.span()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::OperationOutcome;
    use crate::monitor::{AlertThresholds, RetryPolicy};
    use crate::report::ReportStatus;
    use crate::testing::{TestLog, log_id};
    use veritrail_crypto::ContentHash;

    fn engine(log: &TestLog) -> IntegrityEngine {
        IntegrityEngine::builder(log.accessor(), Arc::clone(&log.store))
            .build()
            .unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test").with_initiator("ops")
    }

    fn fast_monitoring() -> MonitoringConfig {
        MonitoringConfig {
            verification_interval_ms: 3_600_000,
            sequence_interval_ms: 3_600_000,
            corruption_interval_ms: 3_600_000,
            sample_rate: 1.0,
            max_range_per_tick: 1_000,
            batch_size: 100,
            thresholds: AlertThresholds::default(),
            channels: vec!["broadcast".into()],
            retry: RetryPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_verify_updates_head() {
        let log = TestLog::with_chain(12).await;
        let engine = engine(&log);
        let opts = engine.check_options();

        let result = engine.verify(&ctx(), &log_id(), 1, 12, &opts).await.unwrap();
        assert!(result.is_valid);
        let head = engine.get_chain_head(&ctx(), &log_id()).await.unwrap().unwrap();
        assert_eq!(head.sequence, 12);
        assert!(head.healthy);

        // Ranges not starting at genesis leave the head alone.
        log.append_events(13, 15).await;
        engine.verify(&ctx(), &log_id(), 13, 15, &opts).await.unwrap();
        assert_eq!(engine.get_chain_head(&ctx(), &log_id()).await.unwrap().unwrap().sequence, 12);

        let inc = engine
            .verify_incremental(&ctx(), &log_id(), 12, None, &opts)
            .await
            .unwrap();
        assert_eq!((inc.start_sequence, inc.end_sequence), (13, 15));
        assert_eq!(inc.seed_hash, Some(head.running_hash));
        assert_eq!(engine.get_chain_head(&ctx(), &log_id()).await.unwrap().unwrap().sequence, 15);
    }

    #[tokio::test]
    async fn test_repair_is_journaled_and_refreshes_head() {
        let log = TestLog::with_chain(8).await;
        let engine = engine(&log);
        let opts = engine.check_options();
        engine.verify(&ctx(), &log_id(), 1, 8, &opts).await.unwrap();

        log.set_stored_hash(8, ContentHash::hash(b"x")).await;
        let result = engine
            .repair_hash_chain(&ctx(), &log_id(), 1, 8, &opts)
            .await
            .unwrap();
        assert!(result.success);

        let head = engine.get_chain_head(&ctx(), &log_id()).await.unwrap().unwrap();
        assert_eq!(head.hash, log.get(8).await.content_hash);

        let journal = engine.journal_records(&ctx(), &log_id()).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].kind, OperationKind::RepairHashChain);
        assert_eq!(journal[0].actor.as_deref(), Some("ops"));
        assert!(engine.verify_journal(&ctx(), &log_id()).await.unwrap().valid);
        assert!(engine.verify_repair_records(&ctx(), &log_id()).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_failed_repair_is_journaled() {
        let log = TestLog::with_chain(4).await;
        let engine = engine(&log);
        let err = engine
            .repair_hash_chain(&ctx(), &log_id(), 5, 2, &engine.check_options())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Validation(_)));

        let journal = engine.journal_records(&ctx(), &log_id()).await.unwrap();
        assert!(matches!(journal[0].outcome, OperationOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let log = TestLog::with_chain(30).await;
        log.delete(15).await;
        let engine = engine(&log);
        let mut alerts = engine.subscribe_alerts();

        engine
            .setup_integrity_monitoring(&ctx(), &log_id(), fast_monitoring())
            .await
            .unwrap();
        let mut status = engine.watch_monitor(&log_id()).await.unwrap();
        status.wait_for(|s| s.ticks >= 3).await.unwrap();
        let raised = alerts.recv().await.unwrap();
        assert_eq!(raised.log_id, log_id());

        let open = engine.get_alerts(&ctx(), &log_id(), false).await.unwrap();
        assert!(!open.is_empty());
        for alert in &open {
            engine
                .acknowledge_alert(&ctx(), &log_id(), alert.id, "ops", Some("restored".into()))
                .await
                .unwrap();
        }
        assert!(engine.get_alerts(&ctx(), &log_id(), false).await.unwrap().is_empty());
        assert!(engine.notify_new_events(&log_id()).await);

        let status = engine.stop_monitoring(&ctx(), &log_id()).await.unwrap().unwrap();
        assert!(!status.running);
        assert!(engine.monitor_status(&log_id()).await.is_none());
        assert!(!engine.notify_new_events(&log_id()).await);

        let kinds: Vec<OperationKind> = engine
            .journal_records(&ctx(), &log_id())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&OperationKind::SetupMonitoring));
        assert!(kinds.contains(&OperationKind::AcknowledgeAlert));
        assert_eq!(kinds.last(), Some(&OperationKind::StopMonitoring));
    }

    #[tokio::test]
    async fn test_setup_again_replaces_running_monitor() {
        let log = TestLog::with_chain(10).await;
        let engine = engine(&log);

        engine
            .setup_integrity_monitoring(&ctx(), &log_id(), fast_monitoring())
            .await
            .unwrap();
        let mut first = engine.watch_monitor(&log_id()).await.unwrap();
        first.wait_for(|s| s.ticks >= 1).await.unwrap();

        let mut config = fast_monitoring();
        config.batch_size = 5;
        engine
            .setup_integrity_monitoring(&ctx(), &log_id(), config)
            .await
            .unwrap();
        assert!(!first.borrow().running);

        let mut second = engine.watch_monitor(&log_id()).await.unwrap();
        second.wait_for(|s| s.ticks >= 1).await.unwrap();
        assert!(second.borrow().running);
        assert!(!first.borrow().running);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_channel_rejected() {
        let log = TestLog::with_chain(3).await;
        let engine = engine(&log);
        let mut config = fast_monitoring();
        config.channels = vec!["pager".into()];
        let err = engine
            .setup_integrity_monitoring(&ctx(), &log_id(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Validation(_)));
        assert!(engine.monitor_status(&log_id()).await.is_none());
    }

    #[tokio::test]
    async fn test_resume_after_restart() {
        let log = TestLog::with_chain(5).await;
        let first = engine(&log);
        first
            .setup_integrity_monitoring(&ctx(), &log_id(), fast_monitoring())
            .await
            .unwrap();
        first.shutdown().await;

        let second = engine(&log);
        let resumed = second.resume_monitoring(&ctx()).await.unwrap();
        assert_eq!(resumed, vec![log_id()]);
        assert!(second.monitor_status(&log_id()).await.is_some());
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_report() {
        let log = TestLog::with_chain(10).await;
        let engine = engine(&log);
        let ctx = ctx();
        let report = engine
            .generate_integrity_report(&ctx, &log_id(), 1, 10, &engine.check_options())
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Intact);
        assert_eq!(report.correlation_id, ctx.correlation_id);
    }

    #[tokio::test]
    async fn test_rotation_keeps_records_verifiable() {
        let log = TestLog::with_chain(4).await;
        let engine = engine(&log);
        let opts = engine.check_options();
        log.set_stored_hash(2, ContentHash::hash(b"x")).await;
        engine.repair_hash_chain(&ctx(), &log_id(), 1, 4, &opts).await.unwrap();

        engine.rotate_signing_key(&ctx(), KeyPair::generate()).await;
        assert!(engine.verify_repair_records(&ctx(), &log_id()).await.unwrap().valid);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store: Arc<dyn KvStore> = Arc::new(veritrail_storage::MemoryKvStore::new());
        let accessor = Arc::new(crate::accessor::KvEventAccessor::new(Arc::clone(&store)));
        let mut config = IntegrityConfig::default();
        config.verification.batch_size = 0;
        let err = IntegrityEngine::builder(accessor, store)
            .config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Validation(_)));
    }
}
