//! Corruption scanner.
//!
//! Checks event content independently of hash validity. Four check
//! families can be selected per scan:
//!
//! - structural: required fields present, hash fields non-zero, timestamps
//!   not in the future
//! - referential: identifiers plausible, vocabulary tags recognised, stored
//!   `previous_hash` equal to the predecessor's stored hash
//! - encoding: no control characters or replacement characters, JSON-looking
//!   metadata parses, lengths within bounds
//! - statistical: bursts of identical content hashes and action
//!   distributions diverging from the trailing baseline. These are always
//!   `needs_review` candidates and never count as confirmed corruption.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use veritrail_crypto::ContentHash;

use crate::accessor::{EventAccessor, MalformedEvent};
use crate::chain::GENESIS_HASH;
use crate::error::{IntegrityError, IntegrityResult};
use crate::event::{AuditEvent, EventId, LogId};
use crate::options::{CheckOptions, RangePager, validate_range};
use crate::severity::Severity;

// ---------------------------------------------------------------------------
// Criteria and findings
// ---------------------------------------------------------------------------

/// What to scan and how.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptionCriteria {
    /// First sequence.
    pub start: u64,
    /// Last sequence.
    pub end: u64,
    /// Run structural checks.
    pub structural: bool,
    /// Run referential checks.
    pub referential: bool,
    /// Run encoding checks.
    pub encoding: bool,
    /// Run statistical checks.
    pub statistical: bool,
    /// Fraction of events examined by the per-event checks, in `(0, 1]`.
    pub sample_rate: f64,
    /// Stop after this many findings; defaults to the configured limit.
    pub max_findings: Option<usize>,
}

impl CorruptionCriteria {
    /// Structural, referential and encoding checks over every event of
    /// `[start, end]`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            structural: true,
            referential: true,
            encoding: true,
            statistical: false,
            sample_rate: 1.0,
            max_findings: None,
        }
    }

    /// Also run the statistical checks.
    #[must_use]
    pub fn with_statistical(mut self) -> Self {
        self.statistical = true;
        self
    }

    /// Examine only a deterministic `rate` fraction of events.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Stop after `max` findings.
    #[must_use]
    pub fn with_max_findings(mut self, max: usize) -> Self {
        self.max_findings = Some(max);
        self
    }

    fn validate(&self) -> IntegrityResult<()> {
        validate_range(self.start, self.end)?;
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 || self.sample_rate > 1.0 {
            return Err(IntegrityError::Validation(format!(
                "sample rate {} must be in (0, 1]",
                self.sample_rate
            )));
        }
        if self.max_findings == Some(0) {
            return Err(IntegrityError::Validation(
                "max_findings must be at least 1".into(),
            ));
        }
        if !(self.structural || self.referential || self.encoding || self.statistical) {
            return Err(IntegrityError::Validation(
                "at least one check family must be selected".into(),
            ));
        }
        Ok(())
    }
}

/// Kind of anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionType {
    /// A required field is absent or empty.
    MissingField,
    /// A field holds an impossible value.
    InvalidValue,
    /// An identifier does not name anything plausible.
    DanglingReference,
    /// A vocabulary field holds an unrecognised tag.
    UnknownVocabulary,
    /// Stored `previous_hash` differs from the predecessor's stored hash.
    BrokenLink,
    /// Text is not clean UTF-8 / JSON.
    InvalidEncoding,
    /// A value is longer than allowed.
    LengthExceeded,
    /// Several consecutive events share one content hash.
    HashBurst,
    /// The action mix shifted sharply against the trailing baseline.
    DistributionDrift,
}

/// Effort needed to fix an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairComplexity {
    /// Recompute a derived value.
    Trivial,
    /// Rewrite a link.
    Moderate,
    /// Needs data from elsewhere.
    Complex,
    /// Needs a human.
    Manual,
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionInstance {
    /// Affected event; `None` for window-level statistical findings.
    pub event_id: Option<EventId>,
    /// Sequence of the event, or first sequence of the window.
    pub sequence: u64,
    /// Anomaly kind.
    pub corruption_type: CorruptionType,
    /// Severity.
    pub severity: Severity,
    /// Offending field.
    pub field: String,
    /// What a healthy value would be, when known.
    pub expected: Option<String>,
    /// What was found.
    pub actual: Option<String>,
    /// Whether the repair engine can fix it.
    pub repairable: bool,
    /// Effort to fix.
    pub complexity: RepairComplexity,
    /// A candidate for human review, not confirmed corruption.
    pub needs_review: bool,
}

impl CorruptionInstance {
    fn on(event: &AuditEvent, corruption_type: CorruptionType, severity: Severity, field: &str) -> Self {
        Self::at(Some(event.id), event.sequence, corruption_type, severity, field)
    }

    /// A stored entry that does not decode into an event at all.
    fn undecodable(entry: &MalformedEvent) -> Self {
        Self::at(
            None,
            entry.sequence,
            CorruptionType::InvalidEncoding,
            Severity::Critical,
            &entry.key,
        )
        .expected("decodable audit event")
        .actual(entry.reason.clone())
    }

    fn at(
        event_id: Option<EventId>,
        sequence: u64,
        corruption_type: CorruptionType,
        severity: Severity,
        field: &str,
    ) -> Self {
        Self {
            event_id,
            sequence,
            corruption_type,
            severity,
            field: field.to_owned(),
            expected: None,
            actual: None,
            repairable: false,
            complexity: RepairComplexity::Manual,
            needs_review: false,
        }
    }

    fn expected(mut self, value: impl Into<String>) -> Self {
        self.expected = Some(value.into());
        self
    }

    fn actual(mut self, value: impl Into<String>) -> Self {
        self.actual = Some(value.into());
        self
    }

    fn repairable(mut self, complexity: RepairComplexity) -> Self {
        self.repairable = true;
        self.complexity = complexity;
        self
    }

    fn for_review(mut self) -> Self {
        self.needs_review = true;
        self
    }
}

/// Overall corruption level of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionLevel {
    /// Nothing found.
    None,
    /// Only low-impact or review findings.
    Low,
    /// Some confirmed corruption.
    Medium,
    /// At least 1% of events corrupted, or a critical finding.
    High,
    /// Widespread corruption.
    Severe,
}

impl CorruptionLevel {
    /// Derive the level from the corrupted ratio and the worst confirmed
    /// severity.
    #[must_use]
    pub fn derive(ratio: f64, instances: &[CorruptionInstance]) -> Self {
        if instances.is_empty() {
            return Self::None;
        }
        let worst = instances
            .iter()
            .filter(|i| !i.needs_review)
            .map(|i| i.severity)
            .max();
        let critical = worst == Some(Severity::Critical);

        if ratio >= 0.10 || (critical && ratio >= 0.05) {
            Self::Severe
        } else if ratio >= 0.01 || critical {
            Self::High
        } else if ratio >= 0.001 || worst == Some(Severity::High) {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptionReport {
    /// Log scanned.
    pub log_id: LogId,
    /// First sequence covered.
    pub start: u64,
    /// Last sequence covered.
    pub end: u64,
    /// Events examined by the per-event checks.
    pub events_scanned: u64,
    /// Distinct events with at least one confirmed finding.
    pub corrupted_events: u64,
    /// `corrupted_events / events_scanned`.
    pub corruption_ratio: f64,
    /// Derived level.
    pub level: CorruptionLevel,
    /// Findings in sequence order.
    pub instances: Vec<CorruptionInstance>,
    /// Stopped early on deadline, cancellation or the findings limit.
    pub truncated: bool,
    /// Sample rate used.
    pub sample_rate: f64,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
}

impl CorruptionReport {
    /// Findings needing human review.
    pub fn review_candidates(&self) -> impl Iterator<Item = &CorruptionInstance> {
        self.instances.iter().filter(|i| i.needs_review)
    }

    /// Confirmed findings.
    pub fn confirmed(&self) -> impl Iterator<Item = &CorruptionInstance> {
        self.instances.iter().filter(|i| !i.needs_review)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Scanner bounds and statistical thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    /// Maximum length of identifiers, action names and metadata keys.
    pub max_field_len: usize,
    /// Maximum length of a metadata value.
    pub max_metadata_value_len: usize,
    /// Identical consecutive content hashes that make a burst.
    pub burst_threshold: usize,
    /// Total-variation distance that counts as drift.
    pub divergence_threshold: f64,
    /// Events per statistical window.
    pub baseline_window: u64,
    /// Default findings limit.
    pub max_findings: usize,
    /// How far in the future a timestamp may be.
    pub future_tolerance: Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            max_field_len: 1024,
            max_metadata_value_len: 8192,
            burst_threshold: 3,
            divergence_threshold: 0.5,
            baseline_window: 1000,
            max_findings: 10_000,
            future_tolerance: Duration::hours(24),
        }
    }
}

impl From<&veritrail_config::IntegrityConfig> for ScannerSettings {
    fn from(config: &veritrail_config::IntegrityConfig) -> Self {
        let s = &config.scanner;
        Self {
            max_field_len: s.max_field_len,
            max_metadata_value_len: s.max_metadata_value_len,
            burst_threshold: s.burst_threshold.max(2),
            divergence_threshold: s.divergence_threshold,
            baseline_window: s.baseline_window.max(1),
            max_findings: s.max_findings.max(1),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Statistical state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BurstTracker {
    hash: Option<ContentHash>,
    first: Option<(u64, EventId)>,
    len: usize,
}

impl BurstTracker {
    /// Feed the next event; returns a finished burst when a run ends.
    fn observe(&mut self, event: &AuditEvent, threshold: usize) -> Option<CorruptionInstance> {
        if !event.content_hash.is_zero() && self.hash == Some(event.content_hash) {
            self.len = self.len.saturating_add(1);
            return None;
        }
        let finished = self.finish(threshold);
        self.hash = Some(event.content_hash);
        self.first = Some((event.sequence, event.id));
        self.len = 1;
        finished
    }

    fn finish(&mut self, threshold: usize) -> Option<CorruptionInstance> {
        let (Some(hash), Some((sequence, id))) = (self.hash, self.first) else {
            return None;
        };
        if self.len < threshold {
            return None;
        }
        Some(
            CorruptionInstance::at(
                Some(id),
                sequence,
                CorruptionType::HashBurst,
                Severity::Medium,
                "content_hash",
            )
            .expected("distinct hashes")
            .actual(format!("{} events sharing {}", self.len, hash.short_hex()))
            .for_review(),
        )
    }
}

struct DriftTracker {
    window: u64,
    baseline: Option<BTreeMap<String, u64>>,
    current: BTreeMap<String, u64>,
    current_len: u64,
    current_start: u64,
}

impl DriftTracker {
    fn new(window: u64) -> Self {
        Self {
            window,
            baseline: None,
            current: BTreeMap::new(),
            current_len: 0,
            current_start: 0,
        }
    }

    fn observe(&mut self, event: &AuditEvent, threshold: f64) -> Option<CorruptionInstance> {
        if self.current_len == 0 {
            self.current_start = event.sequence;
        }
        let count = self.current.entry(event.action_name().to_owned()).or_default();
        *count = count.saturating_add(1);
        self.current_len = self.current_len.saturating_add(1);
        if self.current_len < self.window {
            return None;
        }

        let current = std::mem::take(&mut self.current);
        self.current_len = 0;
        let finding = self.baseline.as_ref().and_then(|baseline| {
            let distance = total_variation(baseline, &current);
            (distance > threshold).then(|| {
                let mut finding = CorruptionInstance::at(
                    None,
                    self.current_start,
                    CorruptionType::DistributionDrift,
                    Severity::Medium,
                    "action",
                )
                .actual(format!(
                    "total variation {distance:.3}, dominant action '{}'",
                    dominant(&current).unwrap_or_default()
                ))
                .for_review();
                finding.expected = dominant(baseline).map(|a| format!("dominant action '{a}'"));
                finding
            })
        });
        self.baseline = Some(current);
        finding
    }
}

#[allow(clippy::cast_precision_loss)]
fn total_variation(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> f64 {
    let total_a = a.values().sum::<u64>().max(1) as f64;
    let total_b = b.values().sum::<u64>().max(1) as f64;
    let keys: HashSet<&String> = a.keys().chain(b.keys()).collect();
    let sum: f64 = keys
        .into_iter()
        .map(|k| {
            let p = a.get(k).copied().unwrap_or(0) as f64 / total_a;
            let q = b.get(k).copied().unwrap_or(0) as f64 / total_b;
            (p - q).abs()
        })
        .sum();
    sum / 2.0
}

fn dominant(counts: &BTreeMap<String, u64>) -> Option<&str> {
    counts
        .iter()
        .max_by_key(|(_, n)| **n)
        .map(|(action, _)| action.as_str())
}

/// Deterministic per-sequence sampling, so repeated scans see the same
/// events.
#[allow(clippy::cast_precision_loss)]
fn sampled(sequence: u64, rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    let digest = ContentHash::hash_with_domain("veritrail 2026 scan-sample v1", &sequence.to_le_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) as f64 / u64::MAX as f64) < rate
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Detects corrupted event content.
pub struct CorruptionScanner {
    accessor: Arc<dyn EventAccessor>,
    settings: ScannerSettings,
}

impl std::fmt::Debug for CorruptionScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorruptionScanner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CorruptionScanner {
    /// Create a scanner.
    #[must_use]
    pub fn new(accessor: Arc<dyn EventAccessor>, settings: ScannerSettings) -> Self {
        Self { accessor, settings }
    }

    /// Scan `[criteria.start, criteria.end]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad criteria and operational errors
    /// from the accessor.
    pub async fn detect_corruption(
        &self,
        log: &LogId,
        criteria: &CorruptionCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<CorruptionReport> {
        criteria.validate()?;
        let started_at = Utc::now();
        let limit = criteria.max_findings.unwrap_or(self.settings.max_findings);
        let now = Utc::now();

        let mut predecessor = self.predecessor_hash(log, criteria.start).await?;
        let mut pager = RangePager::new(
            self.accessor.as_ref(),
            log,
            criteria.start,
            criteria.end,
            opts.batch_size,
        );
        let mut instances: Vec<CorruptionInstance> = Vec::new();
        let mut scanned: u64 = 0;
        let mut undecodable: u64 = 0;
        let mut processed_to = criteria.start.saturating_sub(1);
        let mut truncated = false;
        let mut bursts = BurstTracker::default();
        let mut drift = DriftTracker::new(self.settings.baseline_window);

        'pages: loop {
            if opts.stop_reason().is_some() {
                truncated = true;
                break;
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };
            debug!(log_id = %log, start = page.start, end = page.end, "Scanning page");

            let mut expected_next = page.start;
            for group in &page.groups {
                if opts.stop_reason().is_some() || instances.len() >= limit {
                    truncated = true;
                    break 'pages;
                }
                // A gap breaks the link check; the verifier reports the gap.
                if group.sequence != expected_next {
                    predecessor = None;
                }
                expected_next = group.sequence.saturating_add(1);

                if criteria.structural && sampled(group.sequence, criteria.sample_rate) {
                    for entry in &group.malformed {
                        scanned = scanned.saturating_add(1);
                        undecodable = undecodable.saturating_add(1);
                        instances.push(CorruptionInstance::undecodable(entry));
                    }
                }
                for event in &group.events {
                    if sampled(event.sequence, criteria.sample_rate) {
                        scanned = scanned.saturating_add(1);
                        if criteria.structural {
                            instances.extend(self.structural(event, now));
                        }
                        if criteria.referential {
                            instances.extend(referential(event, predecessor));
                        }
                        if criteria.encoding {
                            instances.extend(self.encoding(event));
                        }
                    }
                    if criteria.statistical {
                        instances.extend(bursts.observe(event, self.settings.burst_threshold));
                        instances.extend(drift.observe(event, self.settings.divergence_threshold));
                    }
                }
                predecessor = group.events.first().map(|e| e.content_hash);
                processed_to = group.sequence;
            }
            if expected_next <= page.end {
                predecessor = None;
            }
            processed_to = page.end;
        }
        if criteria.statistical && !truncated {
            instances.extend(bursts.finish(self.settings.burst_threshold));
        }
        if instances.len() > limit {
            instances.truncate(limit);
            truncated = true;
        }

        let corrupted: HashSet<EventId> = instances
            .iter()
            .filter(|i| !i.needs_review)
            .filter_map(|i| i.event_id)
            .collect();
        let corrupted_events = u64::try_from(corrupted.len())
            .unwrap_or(u64::MAX)
            .saturating_add(undecodable);
        #[allow(clippy::cast_precision_loss)]
        let corruption_ratio = if scanned == 0 {
            0.0
        } else {
            (corrupted_events as f64 / scanned as f64).min(1.0)
        };
        let level = CorruptionLevel::derive(corruption_ratio, &instances);

        if level >= CorruptionLevel::High {
            warn!(
                log_id = %log,
                start = criteria.start,
                end = processed_to,
                ?level,
                corrupted = corrupted_events,
                scanned,
                "Corruption detected"
            );
        } else {
            info!(
                log_id = %log,
                start = criteria.start,
                end = processed_to,
                ?level,
                findings = instances.len(),
                scanned,
                "Corruption scan complete"
            );
        }

        Ok(CorruptionReport {
            log_id: log.clone(),
            start: criteria.start,
            end: processed_to,
            events_scanned: scanned,
            corrupted_events,
            corruption_ratio,
            level,
            instances,
            truncated,
            sample_rate: criteria.sample_rate,
            started_at,
        })
    }

    async fn predecessor_hash(&self, log: &LogId, start: u64) -> IntegrityResult<Option<ContentHash>> {
        if start <= 1 {
            return Ok(Some(GENESIS_HASH));
        }
        let prev = start.saturating_sub(1);
        Ok(self
            .accessor
            .get_events_by_sequence_range(log, prev, prev)
            .await?
            .first()
            .map(|e| e.content_hash))
    }

    fn structural(&self, event: &AuditEvent, now: DateTime<Utc>) -> Vec<CorruptionInstance> {
        use CorruptionType::{InvalidValue, MissingField};
        let mut out = Vec::new();

        match &event.actor {
            None => out.push(CorruptionInstance::on(event, MissingField, Severity::High, "actor")),
            Some(actor) if actor.id.trim().is_empty() => {
                out.push(CorruptionInstance::on(event, MissingField, Severity::High, "actor.id"));
            },
            Some(_) => {},
        }
        if event.action.as_deref().is_none_or(|a| a.trim().is_empty()) {
            out.push(CorruptionInstance::on(event, MissingField, Severity::High, "action"));
        }
        if let Some(target) = &event.target
            && target.id.trim().is_empty()
        {
            out.push(CorruptionInstance::on(event, MissingField, Severity::Medium, "target.id"));
        }
        if event.content_hash.is_zero() {
            out.push(
                CorruptionInstance::on(event, InvalidValue, Severity::Critical, "content_hash")
                    .actual("zero hash")
                    .repairable(RepairComplexity::Trivial),
            );
        }
        if event.sequence > 1 && event.previous_hash.is_zero() {
            out.push(
                CorruptionInstance::on(event, InvalidValue, Severity::High, "previous_hash")
                    .actual("zero hash")
                    .repairable(RepairComplexity::Moderate),
            );
        }
        if let Some(limit) = now.checked_add_signed(self.settings.future_tolerance)
            && event.timestamp > limit
        {
            out.push(
                CorruptionInstance::on(event, InvalidValue, Severity::Medium, "timestamp")
                    .expected(format!("at most {limit}"))
                    .actual(event.timestamp.to_rfc3339()),
            );
        }
        out
    }

    fn encoding(&self, event: &AuditEvent) -> Vec<CorruptionInstance> {
        let mut out = Vec::new();
        let max = self.settings.max_field_len;
        if let Some(actor) = &event.actor {
            check_text(event, "actor.id", &actor.id, max, &mut out);
        }
        if let Some(target) = &event.target {
            check_text(event, "target.id", &target.id, max, &mut out);
        }
        if let Some(action) = &event.action {
            check_text(event, "action", action, max, &mut out);
        }
        for (key, value) in &event.metadata {
            check_text(event, "metadata key", key, max, &mut out);
            let field = format!("metadata.{key}");
            check_text(event, &field, value, self.settings.max_metadata_value_len, &mut out);
            let trimmed = value.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && let Err(e) = serde_json::from_str::<serde_json::Value>(value)
            {
                out.push(
                    CorruptionInstance::on(event, CorruptionType::InvalidEncoding, Severity::Medium, &field)
                        .expected("valid JSON")
                        .actual(e.to_string()),
                );
            }
        }
        out
    }
}

fn referential(event: &AuditEvent, predecessor: Option<ContentHash>) -> Vec<CorruptionInstance> {
    use CorruptionType::{BrokenLink, DanglingReference, UnknownVocabulary};
    const PLACEHOLDERS: &[&str] = &["null", "nil", "none", "undefined", "unknown"];
    let placeholder = |id: &str| PLACEHOLDERS.contains(&id.trim().to_ascii_lowercase().as_str());
    let mut out = Vec::new();

    if let Some(actor) = &event.actor {
        if placeholder(&actor.id) {
            out.push(
                CorruptionInstance::on(event, DanglingReference, Severity::Medium, "actor.id")
                    .actual(actor.id.clone()),
            );
        }
        if !actor.kind.is_valid() {
            out.push(CorruptionInstance::on(event, UnknownVocabulary, Severity::Low, "actor.kind"));
        }
    }
    if let Some(target) = &event.target {
        if placeholder(&target.id) {
            out.push(
                CorruptionInstance::on(event, DanglingReference, Severity::Medium, "target.id")
                    .actual(target.id.clone()),
            );
        }
        if !target.kind.is_valid() {
            out.push(CorruptionInstance::on(event, UnknownVocabulary, Severity::Low, "target.kind"));
        }
    }
    if !event.result.is_valid() {
        out.push(CorruptionInstance::on(event, UnknownVocabulary, Severity::Low, "result"));
    }
    if event.data_class.is_some_and(|c| !c.is_valid()) {
        out.push(CorruptionInstance::on(event, UnknownVocabulary, Severity::Low, "data_class"));
    }
    if event.legal_basis.is_some_and(|b| !b.is_valid()) {
        out.push(CorruptionInstance::on(event, UnknownVocabulary, Severity::Low, "legal_basis"));
    }
    if let Some(expected) = predecessor
        && event.previous_hash != expected
    {
        out.push(
            CorruptionInstance::on(event, BrokenLink, Severity::Critical, "previous_hash")
                .expected(expected.to_hex())
                .actual(event.previous_hash.to_hex())
                .repairable(RepairComplexity::Moderate),
        );
    }
    out
}

fn check_text(
    event: &AuditEvent,
    field: &str,
    value: &str,
    max_len: usize,
    out: &mut Vec<CorruptionInstance>,
) {
    if value.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r')) {
        out.push(
            CorruptionInstance::on(event, CorruptionType::InvalidEncoding, Severity::Medium, field)
                .actual("control characters"),
        );
    }
    if value.contains('\u{FFFD}') {
        out.push(
            CorruptionInstance::on(event, CorruptionType::InvalidEncoding, Severity::Medium, field)
                .actual("replacement characters from a lossy decode"),
        );
    }
    if value.len() > max_len {
        out.push(
            CorruptionInstance::on(event, CorruptionType::LengthExceeded, Severity::Low, field)
                .expected(format!("at most {max_len} bytes"))
                .actual(format!("{} bytes", value.len())),
        );
    }
}
