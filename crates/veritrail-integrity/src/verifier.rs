//! Chain verifier.
//!
//! Walks a sequence range in order, recomputes every event's hash from its
//! content and the running previous hash, and compares it with the stored
//! hash. The walk never stops at the first failure: the result lists every
//! broken span in the range.
//!
//! Walking rules:
//!
//! - The running hash is seeded with [`GENESIS_HASH`] when the range starts
//!   at 1, otherwise with the stored hash of `start - 1`. If that event is
//!   absent the first present event's stored `previous_hash` is used.
//! - A mismatch does not advance the running hash, so a break propagates
//!   forward until the end of the range or the next missing sequence.
//! - After a missing sequence the running hash is reseeded from the next
//!   present event's stored `previous_hash`.
//! - Among events sharing a sequence, the one whose stored hash verifies is
//!   used; otherwise the first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use veritrail_crypto::ContentHash;

use crate::accessor::{EventAccessor, MalformedEvent};
use crate::chain::{GENESIS_HASH, compute_hash};
use crate::error::{IntegrityError, IntegrityResult};
use crate::event::{ChainLink, EventId, LogId};
use crate::options::{CheckOptions, RangePager, SequenceGroup, validate_range};
use crate::severity::Severity;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How a verification result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Every sequence in an explicit range.
    Full,
    /// Everything after a known position.
    Incremental,
    /// Evenly spaced windows of a range.
    Sample,
}

/// Why a span of the chain cannot be proven valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    /// Recomputed hash differs from the stored one.
    HashMismatch,
    /// A sequence inside the range has no stored event.
    MissingEvent,
    /// The stored hash is zero, or the event cannot be hashed at all.
    InvalidHash,
}

impl BreakType {
    /// Severity assigned to spans of this type.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::HashMismatch => Severity::Critical,
            Self::MissingEvent | Self::InvalidHash => Severity::High,
        }
    }

    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::MissingEvent => "missing_event",
            Self::InvalidHash => "invalid_hash",
        }
    }
}

/// A contiguous span where the chain is not provably valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenChain {
    /// First sequence of the span.
    pub start_sequence: u64,
    /// Last sequence of the span (inclusive).
    pub end_sequence: u64,
    /// Break classification.
    pub break_type: BreakType,
    /// Hash recomputed for the first event of the span.
    pub expected_hash: Option<ContentHash>,
    /// Hash stored on the first event of the span.
    pub actual_hash: Option<ContentHash>,
    /// Events inside the span. Empty for missing events.
    pub affected_events: Vec<EventId>,
    /// Severity.
    pub severity: Severity,
    /// Whether recomputing hashes can heal the span.
    pub repairable: bool,
}

impl BrokenChain {
    /// Number of sequences in the span.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end_sequence
            .saturating_sub(self.start_sequence)
            .saturating_add(1)
    }

    /// Always `false`: a span covers at least one sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    fn adjoins(&self, next: &Self) -> bool {
        self.break_type == next.break_type
            && self.repairable == next.repairable
            && self.end_sequence.checked_add(1) == Some(next.start_sequence)
    }

    fn absorb(&mut self, next: Self) {
        self.end_sequence = next.end_sequence;
        self.affected_events.extend(next.affected_events);
        self.severity = self.severity.max(next.severity);
    }
}

/// Outcome of verifying one sequence range.
///
/// Counters: every present sequence is either valid or invalid, so
/// `hashes_valid + hashes_invalid == events_verified`; `hashes_missing`
/// counts absent sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Log that was verified.
    pub log_id: LogId,
    /// First sequence covered.
    pub start_sequence: u64,
    /// Last sequence covered. Below `start_sequence` when nothing was.
    pub end_sequence: u64,
    /// How the result was produced.
    pub method: VerificationMethod,
    /// Present sequences examined.
    pub events_verified: u64,
    /// Sequences whose stored hash verified.
    pub hashes_valid: u64,
    /// Sequences whose stored hash did not verify.
    pub hashes_invalid: u64,
    /// Sequences with no stored event.
    pub hashes_missing: u64,
    /// Broken spans in sequence order.
    pub broken_chains: Vec<BrokenChain>,
    /// `hashes_valid / events_verified`, or 1.0 when nothing was verified.
    pub integrity_score: f64,
    /// No broken spans and nothing missing.
    pub is_valid: bool,
    /// The walk stopped early on a deadline or cancellation.
    pub truncated: bool,
    /// Running hash the walk started from; `None` if it seeded from the
    /// first present event.
    pub seed_hash: Option<ContentHash>,
    /// Running hash after the last processed sequence.
    pub final_hash: ContentHash,
    /// Last present event processed.
    pub tail: Option<ChainLink>,
    /// The last covered sequence was missing.
    pub ends_with_gap: bool,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Elapsed milliseconds.
    pub duration_ms: u64,
}

impl VerificationResult {
    /// A result covering nothing, positioned after `after`.
    #[must_use]
    pub fn empty(log_id: LogId, after: u64, method: VerificationMethod) -> Self {
        Self {
            log_id,
            start_sequence: after.saturating_add(1),
            end_sequence: after,
            method,
            events_verified: 0,
            hashes_valid: 0,
            hashes_invalid: 0,
            hashes_missing: 0,
            broken_chains: Vec::new(),
            integrity_score: 1.0,
            is_valid: true,
            truncated: false,
            seed_hash: None,
            final_hash: ContentHash::zero(),
            tail: None,
            ends_with_gap: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Whether the result covers no sequences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end_sequence < self.start_sequence
    }

    /// Sequences covered.
    #[must_use]
    pub fn covered(&self) -> u64 {
        self.events_verified.saturating_add(self.hashes_missing)
    }

    /// Invalid plus missing, over sequences covered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let covered = self.covered();
        if covered == 0 {
            return 0.0;
        }
        self.hashes_invalid.saturating_add(self.hashes_missing) as f64 / covered as f64
    }

    /// Spans of one break type.
    pub fn spans_of(&self, break_type: BreakType) -> impl Iterator<Item = &BrokenChain> {
        self.broken_chains
            .iter()
            .filter(move |s| s.break_type == break_type)
    }

    /// Recompute `integrity_score` and `is_valid` from the counters.
    #[allow(clippy::cast_precision_loss)]
    fn finish(&mut self) {
        self.integrity_score = if self.events_verified == 0 {
            1.0
        } else {
            (self.hashes_valid as f64 / self.events_verified as f64).min(1.0)
        };
        self.is_valid = self.broken_chains.is_empty() && self.hashes_missing == 0;
    }

    /// Combine results for disjoint ranges.
    ///
    /// Counters are summed, spans concatenated and sorted, and spans of the
    /// same type that meet at a range boundary are coalesced. The merge is
    /// associative and commutative in everything but timing.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let (first, second) =
            if (self.start_sequence, self.end_sequence) <= (other.start_sequence, other.end_sequence) {
                (self, other)
            } else {
                (other, self)
            };

        let mut spans = first.broken_chains;
        spans.extend(second.broken_chains);
        spans.sort_by_key(|s| (s.start_sequence, s.end_sequence));
        let broken_chains = coalesce(spans);

        let method = if first.method == second.method {
            first.method
        } else if first.method == VerificationMethod::Sample
            || second.method == VerificationMethod::Sample
        {
            VerificationMethod::Sample
        } else {
            VerificationMethod::Incremental
        };

        let (first_tail, first_final, first_gap, first_end) =
            (first.tail, first.final_hash, first.ends_with_gap, first.end_sequence);
        let (tail, final_hash, ends_with_gap) = if second.end_sequence >= first_end {
            (second.tail.or(first_tail), second.final_hash, second.ends_with_gap)
        } else {
            (first_tail, first_final, first_gap)
        };

        let mut merged = Self {
            log_id: first.log_id,
            start_sequence: first.start_sequence.min(second.start_sequence),
            end_sequence: first_end.max(second.end_sequence),
            method,
            events_verified: first.events_verified.saturating_add(second.events_verified),
            hashes_valid: first.hashes_valid.saturating_add(second.hashes_valid),
            hashes_invalid: first.hashes_invalid.saturating_add(second.hashes_invalid),
            hashes_missing: first.hashes_missing.saturating_add(second.hashes_missing),
            broken_chains,
            integrity_score: 1.0,
            is_valid: true,
            truncated: first.truncated || second.truncated,
            seed_hash: first.seed_hash,
            final_hash,
            tail,
            ends_with_gap,
            started_at: first.started_at.min(second.started_at),
            duration_ms: first.duration_ms.max(second.duration_ms),
        };
        merged.finish();
        merged
    }
}

fn coalesce(spans: Vec<BrokenChain>) -> Vec<BrokenChain> {
    let mut out: Vec<BrokenChain> = Vec::with_capacity(spans.len());
    for span in spans {
        match out.last_mut() {
            Some(last) if last.adjoins(&span) => last.absorb(span),
            _ => out.push(span),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Walk state
// ---------------------------------------------------------------------------

struct Break {
    kind: BreakType,
    event: Option<EventId>,
    expected: Option<ContentHash>,
    actual: Option<ContentHash>,
    repairable: bool,
}

struct Walk {
    running: ContentHash,
    reseed: bool,
    open: Option<BrokenChain>,
    spans: Vec<BrokenChain>,
    verified: u64,
    valid: u64,
    invalid: u64,
    missing: u64,
    tail: Option<ChainLink>,
    last_missing: bool,
}

impl Walk {
    fn new(seed: Option<ContentHash>) -> Self {
        Self {
            running: seed.unwrap_or_default(),
            reseed: seed.is_none(),
            open: None,
            spans: Vec::new(),
            verified: 0,
            valid: 0,
            invalid: 0,
            missing: 0,
            tail: None,
            last_missing: false,
        }
    }

    fn missing(&mut self, start: u64, end: u64) {
        let count = end.saturating_sub(start).saturating_add(1);
        self.missing = self.missing.saturating_add(count);
        self.reseed = true;
        self.last_missing = true;
        self.mark(
            start,
            end,
            Some(Break {
                kind: BreakType::MissingEvent,
                event: None,
                expected: None,
                actual: None,
                repairable: false,
            }),
        );
    }

    fn present(&mut self, group: &SequenceGroup) {
        if group.events.is_empty() {
            if let Some(entry) = group.malformed.first() {
                self.undecodable(entry);
            }
            return;
        }

        let evaluated: Vec<_> = group
            .events
            .iter()
            .map(|event| {
                let seed = if self.reseed {
                    event.previous_hash
                } else {
                    self.running
                };
                (event, seed, compute_hash(event, &seed))
            })
            .collect();

        let chosen = evaluated
            .iter()
            .position(|(event, _, computed)| {
                matches!(computed, Ok(h) if !event.content_hash.is_zero() && *h == event.content_hash)
            })
            .unwrap_or(0);
        let Some((event, seed, computed)) = evaluated.into_iter().nth(chosen) else {
            return;
        };

        self.running = seed;
        self.reseed = false;
        self.last_missing = false;
        self.verified = self.verified.saturating_add(1);
        self.tail = Some(ChainLink::from(event));

        let finding = match computed {
            Err(e) => {
                debug!(sequence = event.sequence, error = %e, "Event cannot be hashed");
                Some(Break {
                    kind: BreakType::InvalidHash,
                    event: Some(event.id),
                    expected: None,
                    actual: Some(event.content_hash),
                    repairable: false,
                })
            },
            Ok(hash) if event.content_hash.is_zero() => Some(Break {
                kind: BreakType::InvalidHash,
                event: Some(event.id),
                expected: Some(hash),
                actual: Some(event.content_hash),
                repairable: true,
            }),
            Ok(hash) if hash != event.content_hash => Some(Break {
                kind: BreakType::HashMismatch,
                event: Some(event.id),
                expected: Some(hash),
                actual: Some(event.content_hash),
                repairable: true,
            }),
            Ok(hash) => {
                self.running = hash;
                None
            },
        };

        if finding.is_some() {
            self.invalid = self.invalid.saturating_add(1);
        } else {
            self.valid = self.valid.saturating_add(1);
        }
        self.mark(event.sequence, event.sequence, finding);
    }

    /// A stored entry that cannot be decoded: the sequence is present but no
    /// hash can be computed for it, and the next event has to reseed.
    fn undecodable(&mut self, entry: &MalformedEvent) {
        debug!(sequence = entry.sequence, key = %entry.key, reason = %entry.reason, "Event cannot be decoded");
        self.reseed = true;
        self.last_missing = false;
        self.verified = self.verified.saturating_add(1);
        self.invalid = self.invalid.saturating_add(1);
        self.mark(
            entry.sequence,
            entry.sequence,
            Some(Break {
                kind: BreakType::InvalidHash,
                event: None,
                expected: None,
                actual: None,
                repairable: false,
            }),
        );
    }

    /// Open, extend or close the current span. Findings merge only with an
    /// adjacent open span of the same kind and repairability.
    fn mark(&mut self, start: u64, end: u64, finding: Option<Break>) {
        let Some(finding) = finding else {
            self.close();
            return;
        };

        if let Some(open) = self.open.as_mut()
            && open.break_type == finding.kind
            && open.repairable == finding.repairable
            && open.end_sequence.checked_add(1) == Some(start)
        {
            open.end_sequence = end;
            open.affected_events.extend(finding.event);
            return;
        }

        self.close();
        self.open = Some(BrokenChain {
            start_sequence: start,
            end_sequence: end,
            break_type: finding.kind,
            expected_hash: finding.expected,
            actual_hash: finding.actual,
            affected_events: finding.event.into_iter().collect(),
            severity: finding.kind.severity(),
            repairable: finding.repairable,
        });
    }

    fn close(&mut self) {
        if let Some(span) = self.open.take() {
            self.spans.push(span);
        }
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Paging and parallelism for the verifier.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Sequences per sub-range in partitioned verification.
    pub partition_size: u64,
    /// Sub-ranges verified concurrently.
    pub max_parallel_partitions: usize,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            partition_size: 10_000,
            max_parallel_partitions: 4,
        }
    }
}

impl From<&veritrail_config::IntegrityConfig> for VerifierSettings {
    fn from(config: &veritrail_config::IntegrityConfig) -> Self {
        Self {
            partition_size: config.verification.partition_size.max(1),
            max_parallel_partitions: config.verification.max_parallel_partitions.max(1),
        }
    }
}

/// Recomputes and checks hash chains.
pub struct ChainVerifier {
    accessor: Arc<dyn EventAccessor>,
    settings: VerifierSettings,
}

impl ChainVerifier {
    /// Create a verifier reading through `accessor`.
    #[must_use]
    pub fn new(accessor: Arc<dyn EventAccessor>, settings: VerifierSettings) -> Self {
        Self { accessor, settings }
    }

    /// Running-hash seed for a walk starting at `start`; `None` means seed
    /// from the first present event.
    ///
    /// # Errors
    ///
    /// Returns an error if the accessor fails.
    pub async fn resolve_seed(&self, log: &LogId, start: u64) -> IntegrityResult<Option<ContentHash>> {
        if start <= 1 {
            return Ok(Some(GENESIS_HASH));
        }
        let prev = start.saturating_sub(1);
        let events = self
            .accessor
            .get_events_by_sequence_range(log, prev, prev)
            .await?;
        Ok(events
            .iter()
            .map(|e| e.content_hash)
            .find(|h| !h.is_zero()))
    }

    /// Verify `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn verify(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        validate_range(start, end)?;
        let seed = self.resolve_seed(log, start).await?;
        self.walk(log, start, end, seed, VerificationMethod::Full, opts)
            .await
    }

    /// Verify everything after `from_seq`, at most `limit` sequences.
    ///
    /// `seed` is the running hash at `from_seq` when the caller knows it
    /// (a chain head); otherwise it is resolved from the store.
    ///
    /// # Errors
    ///
    /// Returns operational errors from the accessor.
    pub async fn verify_incremental(
        &self,
        log: &LogId,
        from_seq: u64,
        seed: Option<ContentHash>,
        limit: Option<u64>,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        let Some(latest) = self.accessor.get_latest_sequence(log).await? else {
            return Ok(VerificationResult::empty(
                log.clone(),
                from_seq,
                VerificationMethod::Incremental,
            ));
        };
        let start = from_seq.saturating_add(1);
        let mut end = latest;
        if let Some(limit) = limit {
            end = end.min(from_seq.saturating_add(limit.max(1)));
        }
        if end < start {
            return Ok(VerificationResult::empty(
                log.clone(),
                from_seq,
                VerificationMethod::Incremental,
            ));
        }

        let seed = match seed {
            Some(seed) => Some(seed),
            None => self.resolve_seed(log, start).await?,
        };
        self.walk(log, start, end, seed, VerificationMethod::Incremental, opts)
            .await
    }

    /// Verify `windows` evenly spaced windows of `window_len` sequences.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range or zero
    /// windows, and operational errors from the accessor.
    pub async fn verify_sample(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        windows: u64,
        window_len: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        validate_range(start, end)?;
        if windows == 0 || window_len == 0 {
            return Err(IntegrityError::Validation(
                "sample needs at least one window of at least one sequence".into(),
            ));
        }

        let span = end.saturating_sub(start).saturating_add(1);
        let step = (span / windows).max(window_len);
        let mut merged: Option<VerificationResult> = None;
        let mut window_start = start;
        for _ in 0..windows {
            if window_start > end {
                break;
            }
            let window_end = window_start
                .saturating_add(window_len.saturating_sub(1))
                .min(end);
            let seed = self.resolve_seed(log, window_start).await?;
            let result = self
                .walk(log, window_start, window_end, seed, VerificationMethod::Sample, opts)
                .await?;
            let stop = result.truncated;
            merged = Some(match merged {
                Some(acc) => acc.merge(result),
                None => result,
            });
            if stop {
                break;
            }
            let Some(next) = window_start.checked_add(step) else {
                break;
            };
            window_start = next;
        }

        Ok(merged.unwrap_or_else(|| {
            VerificationResult::empty(
                log.clone(),
                start.saturating_sub(1),
                VerificationMethod::Sample,
            )
        }))
    }

    /// Verify `[start, end]` as concurrently walked sub-ranges.
    ///
    /// Each sub-range is seeded from the stored hash before it. Afterwards
    /// every boundary is checked against the running hash its predecessor
    /// ended with, and sub-ranges that disagree are walked again with that
    /// hash, so the merged result equals a sequential walk.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range and
    /// operational errors from the accessor.
    pub async fn verify_partitioned(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        validate_range(start, end)?;
        let clock = Instant::now();
        let started_at = Utc::now();

        let mut bounds = Vec::new();
        let mut part_start = start;
        loop {
            let part_end = part_start
                .saturating_add(self.settings.partition_size.saturating_sub(1))
                .min(end);
            bounds.push((part_start, part_end));
            match part_end.checked_add(1) {
                Some(next) if next <= end => part_start = next,
                _ => break,
            }
        }
        debug!(log_id = %log, start, end, partitions = bounds.len(), "Verifying partitions");

        let parts: Vec<VerificationResult> = stream::iter(bounds)
            .map(|(s, e)| async move {
                let seed = self.resolve_seed(log, s).await?;
                self.walk(log, s, e, seed, VerificationMethod::Full, opts)
                    .await
            })
            .buffered(self.settings.max_parallel_partitions.max(1))
            .try_collect()
            .await?;

        let mut merged: Option<VerificationResult> = None;
        for part in parts {
            let part = match &merged {
                Some(prev) if !prev.ends_with_gap && part.seed_hash != Some(prev.final_hash) => {
                    debug!(
                        log_id = %log,
                        boundary = part.start_sequence,
                        "Boundary hash disagrees, re-walking partition"
                    );
                    self.walk(
                        log,
                        part.start_sequence,
                        part.end_sequence,
                        Some(prev.final_hash),
                        VerificationMethod::Full,
                        opts,
                    )
                    .await?
                },
                _ => part,
            };
            let stop = part.truncated;
            merged = Some(match merged {
                Some(acc) => acc.merge(part),
                None => part,
            });
            if stop {
                break;
            }
        }

        let mut result = merged.unwrap_or_else(|| {
            VerificationResult::empty(log.clone(), start.saturating_sub(1), VerificationMethod::Full)
        });
        result.started_at = started_at;
        result.duration_ms = elapsed_ms(clock);
        Ok(result)
    }

    /// Walk `[start, end]` from an explicit seed.
    ///
    /// # Errors
    ///
    /// Returns operational errors from the accessor.
    pub async fn walk(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        seed: Option<ContentHash>,
        method: VerificationMethod,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        let clock = Instant::now();
        let started_at = Utc::now();
        let mut walk = Walk::new(seed);
        let mut pager = RangePager::new(self.accessor.as_ref(), log, start, end, opts.batch_size);
        let mut processed_to = start.saturating_sub(1);
        let mut truncated = false;

        'pages: loop {
            if let Some(reason) = opts.stop_reason() {
                debug!(log_id = %log, ?reason, processed_to, "Verification stopped early");
                truncated = true;
                break;
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };

            let mut expected = page.start;
            for group in &page.groups {
                if let Some(reason) = opts.stop_reason() {
                    debug!(log_id = %log, ?reason, processed_to, "Verification stopped early");
                    truncated = true;
                    break 'pages;
                }
                if group.sequence > expected {
                    walk.missing(expected, group.sequence.saturating_sub(1));
                }
                walk.present(group);
                expected = group.sequence.saturating_add(1);
                processed_to = group.sequence;
            }
            if expected <= page.end {
                walk.missing(expected, page.end);
            }
            processed_to = page.end;
        }
        walk.close();

        let mut result = VerificationResult {
            log_id: log.clone(),
            start_sequence: start,
            end_sequence: processed_to,
            method,
            events_verified: walk.verified,
            hashes_valid: walk.valid,
            hashes_invalid: walk.invalid,
            hashes_missing: walk.missing,
            broken_chains: walk.spans,
            integrity_score: 1.0,
            is_valid: true,
            truncated,
            seed_hash: seed,
            final_hash: walk.running,
            tail: walk.tail,
            ends_with_gap: walk.last_missing,
            started_at,
            duration_ms: elapsed_ms(clock),
        };
        result.finish();

        if result.is_valid {
            info!(
                log_id = %log,
                start,
                end = result.end_sequence,
                events = result.events_verified,
                truncated,
                "Chain verified"
            );
        } else {
            warn!(
                log_id = %log,
                start,
                end = result.end_sequence,
                broken_spans = result.broken_chains.len(),
                missing = result.hashes_missing,
                score = result.integrity_score,
                "Chain verification found breaks"
            );
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainVerifier")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

pub(crate) fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestLog, log_id};

    fn verifier(log: &TestLog) -> ChainVerifier {
        ChainVerifier::new(log.accessor(), VerifierSettings::default())
    }

    fn opts() -> CheckOptions {
        CheckOptions::new().with_batch_size(4)
    }

    #[tokio::test]
    async fn test_valid_chain() {
        let log = TestLog::with_chain(5).await;
        let result = verifier(&log).verify(&log_id(), 1, 5, &opts()).await.unwrap();

        assert!(result.is_valid);
        assert_eq!(result.integrity_score, 1.0);
        assert_eq!(result.events_verified, 5);
        assert!(result.broken_chains.is_empty());
        assert_eq!(result.tail.unwrap().sequence, 5);
    }

    #[tokio::test]
    async fn test_corrupt_stored_hash_propagates() {
        let log = TestLog::with_chain(5).await;
        log.set_stored_hash(3, ContentHash::hash(b"forged")).await;

        let result = verifier(&log).verify(&log_id(), 1, 5, &opts()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.broken_chains.len(), 1);
        let span = &result.broken_chains[0];
        assert_eq!((span.start_sequence, span.end_sequence), (3, 5));
        assert_eq!(span.break_type, BreakType::HashMismatch);
        assert_eq!(span.affected_events.len(), 3);
        assert!((result.integrity_score - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_missing_event_reseeds() {
        let log = TestLog::with_chain(8).await;
        log.delete(4).await;

        let result = verifier(&log).verify(&log_id(), 1, 8, &opts()).await.unwrap();
        assert_eq!(result.events_verified, 7);
        assert_eq!(result.hashes_missing, 1);
        assert_eq!(result.hashes_valid, 7);
        assert_eq!(result.broken_chains.len(), 1);
        assert_eq!(result.broken_chains[0].break_type, BreakType::MissingEvent);
        assert!(!result.broken_chains[0].repairable);
        assert!(!result.is_valid);
        assert_eq!(result.integrity_score, 1.0);
    }

    #[tokio::test]
    async fn test_zero_hash_is_invalid() {
        let log = TestLog::with_chain(3).await;
        log.set_stored_hash(3, ContentHash::zero()).await;

        let result = verifier(&log).verify(&log_id(), 1, 3, &opts()).await.unwrap();
        assert_eq!(result.broken_chains[0].break_type, BreakType::InvalidHash);
        assert!(result.broken_chains[0].repairable);
    }

    #[tokio::test]
    async fn test_undecodable_event_is_invalid_not_missing() {
        let log = TestLog::with_chain(5).await;
        log.garble(3).await;

        let result = verifier(&log).verify(&log_id(), 1, 5, &opts()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.events_verified, 5);
        assert_eq!(result.hashes_missing, 0);
        assert_eq!(result.hashes_invalid, 1);
        assert_eq!(result.hashes_valid, 4);
        assert_eq!(result.broken_chains.len(), 1);
        let span = &result.broken_chains[0];
        assert_eq!((span.start_sequence, span.end_sequence), (3, 3));
        assert_eq!(span.break_type, BreakType::InvalidHash);
        assert!(!span.repairable);
        assert!(span.affected_events.is_empty());
        assert!(!result.ends_with_gap);
    }

    #[tokio::test]
    async fn test_adjacent_breaks_split_on_repairability() {
        let log = TestLog::with_chain(6).await;
        log.set_stored_hash(3, ContentHash::zero()).await;
        log.mutate(4, |e| e.action = None).await;

        let result = verifier(&log).verify(&log_id(), 1, 6, &opts()).await.unwrap();
        let spans: Vec<(u64, u64, BreakType, bool)> = result
            .broken_chains
            .iter()
            .map(|s| (s.start_sequence, s.end_sequence, s.break_type, s.repairable))
            .collect();
        assert_eq!(spans[0], (3, 3, BreakType::InvalidHash, true));
        assert_eq!(spans[1], (4, 4, BreakType::InvalidHash, false));
    }

    #[tokio::test]
    async fn test_mid_range_seed_uses_stored_predecessor() {
        let log = TestLog::with_chain(10).await;
        let result = verifier(&log).verify(&log_id(), 6, 10, &opts()).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.events_verified, 5);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let log = TestLog::with_chain(3).await;
        let err = verifier(&log).verify(&log_id(), 3, 2, &opts()).await.unwrap_err();
        assert!(matches!(err, IntegrityError::Validation(_)));
    }

    #[tokio::test]
    async fn test_incremental_matches_full() {
        let log = TestLog::with_chain(12).await;
        log.set_stored_hash(9, ContentHash::hash(b"x")).await;
        let v = verifier(&log);

        let head = v.verify(&log_id(), 1, 6, &opts()).await.unwrap();
        let rest = v
            .verify_incremental(&log_id(), 6, Some(head.final_hash), None, &opts())
            .await
            .unwrap();
        let full = v.verify(&log_id(), 1, 12, &opts()).await.unwrap();
        let joined = head.merge(rest);

        assert_eq!(joined.broken_chains, full.broken_chains);
        assert_eq!(joined.hashes_valid, full.hashes_valid);
        assert_eq!(joined.integrity_score, full.integrity_score);
    }

    #[tokio::test]
    async fn test_incremental_past_latest_is_empty() {
        let log = TestLog::with_chain(3).await;
        let result = verifier(&log)
            .verify_incremental(&log_id(), 3, None, None, &opts())
            .await
            .unwrap();
        assert!(result.is_empty());
        assert!(result.is_valid);
        assert_eq!(result.method, VerificationMethod::Incremental);
    }

    #[tokio::test]
    async fn test_partitioned_equals_sequential() {
        let log = TestLog::with_chain(40).await;
        log.set_stored_hash(10, ContentHash::hash(b"x")).await;
        log.delete(25).await;
        log.set_stored_hash(31, ContentHash::hash(b"y")).await;

        let v = ChainVerifier::new(
            log.accessor(),
            VerifierSettings {
                partition_size: 7,
                max_parallel_partitions: 3,
            },
        );
        let sequential = v.verify(&log_id(), 1, 40, &opts()).await.unwrap();
        let partitioned = v.verify_partitioned(&log_id(), 1, 40, &opts()).await.unwrap();

        assert_eq!(partitioned.broken_chains, sequential.broken_chains);
        assert_eq!(partitioned.events_verified, sequential.events_verified);
        assert_eq!(partitioned.hashes_valid, sequential.hashes_valid);
        assert_eq!(partitioned.hashes_missing, sequential.hashes_missing);
        assert_eq!(partitioned.is_valid, sequential.is_valid);
    }

    #[tokio::test]
    async fn test_merge_is_order_independent() {
        let log = TestLog::with_chain(30).await;
        log.set_stored_hash(12, ContentHash::hash(b"x")).await;
        let v = verifier(&log);
        let a = v.verify(&log_id(), 1, 10, &opts()).await.unwrap();
        let b = v.verify(&log_id(), 11, 20, &opts()).await.unwrap();
        let c = v.verify(&log_id(), 21, 30, &opts()).await.unwrap();

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = c.merge(a.merge(b));
        assert_eq!(left.broken_chains, right.broken_chains);
        assert_eq!(left.integrity_score, right.integrity_score);
        assert_eq!(left.is_valid, right.is_valid);
        assert_eq!((left.start_sequence, left.end_sequence), (1, 30));
    }

    #[tokio::test]
    async fn test_sample_covers_windows_only() {
        let log = TestLog::with_chain(100).await;
        let result = verifier(&log)
            .verify_sample(&log_id(), 1, 100, 4, 5, &opts())
            .await
            .unwrap();
        assert_eq!(result.method, VerificationMethod::Sample);
        assert_eq!(result.events_verified, 20);
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn test_cancelled_walk_is_truncated() {
        let log = TestLog::with_chain(10).await;
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let result = verifier(&log)
            .verify(&log_id(), 1, 10, &opts().with_cancel(token))
            .await
            .unwrap();
        assert!(result.truncated);
        assert_eq!(result.events_verified, 0);
        assert_eq!(result.end_sequence, 0);
    }

    #[tokio::test]
    async fn test_duplicate_prefers_verifying_candidate() {
        let log = TestLog::with_chain(4).await;
        log.insert_forged_duplicate(2).await;

        let result = verifier(&log).verify(&log_id(), 1, 4, &opts()).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.events_verified, 4);
    }
}
