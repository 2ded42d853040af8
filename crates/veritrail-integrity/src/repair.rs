//! Repair engine.
//!
//! Heals `hash_mismatch` and `invalid_hash` spans by recomputing hashes from
//! current event content and the verified previous hash, relinking stored
//! previous hashes along the way, then re-verifies the range. Missing events
//! are reported as unrepairable.
//!
//! Under [`RepairPolicy::RecordSuperseded`] every overwrite is preceded by a
//! signed, hash-linked [`RepairRecord`] holding the superseded value, so a
//! repair never erases the evidence that something was replaced.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use veritrail_crypto::{CanonicalHasher, ContentHash, KeyId, Signature, SignatureVerifier};
use veritrail_telemetry::RequestContext;

use crate::accessor::{AccessorError, EventAccessor};
use crate::chain::compute_hash;
use crate::error::{IntegrityError, IntegrityResult, OperationalError};
use crate::event::{AuditEvent, EventId, LogId};
use crate::ledger::{self, LedgerIssue, LedgerVerification, Linked};
use crate::options::{CheckOptions, RangePager, validate_range};
use crate::state::StateStore;
use crate::verifier::{BreakType, BrokenChain, ChainVerifier, VerificationResult, elapsed_ms};

const REPAIRS_PREFIX: &str = "veritrail:repairs";
const RECORD_HASH_DOMAIN: &str = "veritrail 2026 repair-record v1";

// ---------------------------------------------------------------------------
// Policy and result types
// ---------------------------------------------------------------------------

/// What happens to the value a repair overwrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPolicy {
    /// Persist a signed record of the superseded value before overwriting.
    #[default]
    RecordSuperseded,
    /// Overwrite without a record.
    InPlace,
}

impl RepairPolicy {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecordSuperseded => "record_superseded",
            Self::InPlace => "in_place",
        }
    }
}

impl fmt::Display for RepairPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairPolicy {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record_superseded" => Ok(Self::RecordSuperseded),
            "in_place" => Ok(Self::InPlace),
            other => Err(IntegrityError::Validation(format!(
                "unknown repair policy '{other}'"
            ))),
        }
    }
}

impl From<&veritrail_config::IntegrityConfig> for RepairPolicy {
    fn from(config: &veritrail_config::IntegrityConfig) -> Self {
        // The config crate validates the policy string.
        config.repair.policy.parse().unwrap_or_default()
    }
}

/// Kind of repair action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairActionKind {
    /// Overwrite the stored content hash.
    RecalculateHash,
    /// Overwrite the stored previous hash.
    RebuildLink,
    /// Leave the event untouched.
    Skip,
}

impl RepairActionKind {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecalculateHash => "recalculate_hash",
            Self::RebuildLink => "rebuild_link",
            Self::Skip => "skip",
        }
    }
}

/// One attempted remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAction {
    /// Event acted on.
    pub event_id: EventId,
    /// Its sequence.
    pub sequence: u64,
    /// Action kind.
    pub kind: RepairActionKind,
    /// Value before the action.
    pub before: ContentHash,
    /// Value after the action; `None` when nothing was written.
    pub after: Option<ContentHash>,
    /// Whether the write succeeded.
    pub success: bool,
    /// Failure, if any.
    pub error: Option<String>,
    /// Position of the repair record written for this action.
    pub record_position: Option<u64>,
}

/// A range the engine could not heal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrepairableIssue {
    /// First affected sequence.
    pub start_sequence: u64,
    /// Last affected sequence.
    pub end_sequence: u64,
    /// Break that was being repaired.
    pub break_type: BreakType,
    /// Affected events.
    pub affected_events: Vec<EventId>,
    /// Why it could not be healed.
    pub reason: String,
    /// An operator has to reconstruct data or accept the break.
    pub requires_manual_action: bool,
}

impl UnrepairableIssue {
    fn from_span(span: &BrokenChain, reason: impl Into<String>) -> Self {
        Self {
            start_sequence: span.start_sequence,
            end_sequence: span.end_sequence,
            break_type: span.break_type,
            affected_events: span.affected_events.clone(),
            reason: reason.into(),
            requires_manual_action: true,
        }
    }

    /// The part of `span` from `from` onward that was never attempted.
    fn remainder(span: &BrokenChain, from: u64, reason: impl Into<String>, manual: bool) -> Self {
        let skip = usize::try_from(from.saturating_sub(span.start_sequence)).unwrap_or(usize::MAX);
        Self {
            start_sequence: from,
            end_sequence: span.end_sequence,
            break_type: span.break_type,
            affected_events: span.affected_events.iter().skip(skip).copied().collect(),
            reason: reason.into(),
            requires_manual_action: manual,
        }
    }
}

/// Outcome of [`RepairEngine::repair_hash_chain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairResult {
    /// Log repaired.
    pub log_id: LogId,
    /// First sequence of the requested range.
    pub start_sequence: u64,
    /// Last sequence of the requested range.
    pub end_sequence: u64,
    /// Policy in force.
    pub policy: RepairPolicy,
    /// Verification before any write.
    pub pre_repair: VerificationResult,
    /// Actions attempted, in sequence order.
    pub actions: Vec<RepairAction>,
    /// Spans left broken.
    pub unrepairable: Vec<UnrepairableIssue>,
    /// Verification after the writes.
    pub post_repair: VerificationResult,
    /// The post-repair verification reports the range valid.
    pub success: bool,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Elapsed milliseconds.
    pub duration_ms: u64,
}

impl RepairResult {
    /// Actions whose write went through.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.actions.iter().filter(|a| a.success && a.after.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Repair records
// ---------------------------------------------------------------------------

/// Signed record of one overwritten value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    /// Record id.
    pub id: Uuid,
    /// Log repaired.
    pub log_id: LogId,
    /// 1-based position in the log's repair ledger.
    pub position: u64,
    /// Event overwritten.
    pub event_id: EventId,
    /// Its sequence.
    pub sequence: u64,
    /// Which field was overwritten.
    pub action: RepairActionKind,
    /// Value replaced.
    pub superseded_hash: ContentHash,
    /// Value written.
    pub replacement_hash: ContentHash,
    /// Request that performed the repair.
    pub request_id: Uuid,
    /// Its correlation id.
    pub correlation_id: Uuid,
    /// Who asked for the repair.
    pub initiator: Option<String>,
    /// Hex id of the signing key.
    pub signer_key_id: String,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous record.
    pub previous_hash: ContentHash,
    /// Hash of this record, excluding the signature.
    pub record_hash: ContentHash,
    /// Signature over `record_hash`.
    pub signature: Signature,
}

impl RepairRecord {
    fn content_hash(&self) -> ContentHash {
        let mut hasher = CanonicalHasher::new(RECORD_HASH_DOMAIN);
        hasher
            .bytes("id", self.id.as_bytes())
            .str("log_id", self.log_id.as_str())
            .u64("position", self.position)
            .bytes("event_id", self.event_id.as_uuid().as_bytes())
            .u64("sequence", self.sequence)
            .str("action", self.action.as_str())
            .hash("superseded", &self.superseded_hash)
            .hash("replacement", &self.replacement_hash)
            .bytes("request_id", self.request_id.as_bytes())
            .bytes("correlation_id", self.correlation_id.as_bytes())
            .opt_str("initiator", self.initiator.as_deref())
            .str("signer", &self.signer_key_id)
            .i64("recorded_at", self.recorded_at.timestamp())
            .u64(
                "recorded_at_nanos",
                u64::from(self.recorded_at.timestamp_subsec_nanos()),
            )
            .hash("previous", &self.previous_hash);
        hasher.finalize()
    }

    fn signer(&self) -> Result<KeyId, String> {
        self.signer_key_id.parse().map_err(|e: veritrail_crypto::CryptoError| e.to_string())
    }
}

impl Linked for RepairRecord {
    fn position(&self) -> u64 {
        self.position
    }

    fn previous_hash(&self) -> ContentHash {
        self.previous_hash
    }

    fn record_hash(&self) -> ContentHash {
        self.record_hash
    }

    fn compute_hash(&self) -> ContentHash {
        self.content_hash()
    }
}

// ---------------------------------------------------------------------------
// Range locks
// ---------------------------------------------------------------------------

struct HeldRange {
    token: Uuid,
    log: LogId,
    start: u64,
    end: u64,
}

/// Exclusive locks over overlapping sequence ranges of one log.
#[derive(Default)]
pub struct RangeLocks {
    held: std::sync::Mutex<Vec<HeldRange>>,
    released: Notify,
}

impl fmt::Debug for RangeLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeLocks").finish_non_exhaustive()
    }
}

/// Releases its range on drop.
#[must_use = "the range is released when the guard is dropped"]
pub struct RangeGuard<'a> {
    locks: &'a RangeLocks,
    token: Uuid,
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|r| r.token != self.token);
        self.locks.released.notify_waiters();
    }
}

impl RangeLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, log: &LogId, start: u64, end: u64) -> Option<Uuid> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let overlaps = held
            .iter()
            .any(|r| &r.log == log && r.start <= end && start <= r.end);
        if overlaps {
            return None;
        }
        let token = Uuid::new_v4();
        held.push(HeldRange {
            token,
            log: log.clone(),
            start,
            end,
        });
        Some(token)
    }

    /// Wait until `[start, end]` of `log` overlaps no held range, then hold it.
    ///
    /// # Errors
    ///
    /// Returns [`OperationalError::Timeout`] if `deadline` passes first.
    pub async fn acquire(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        deadline: Option<Instant>,
    ) -> IntegrityResult<RangeGuard<'_>> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(token) = self.try_acquire(log, start, end) {
                return Ok(RangeGuard { locks: self, token });
            }
            debug!(log_id = %log, start, end, "Waiting for overlapping repair");

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        return Err(OperationalError::Timeout(format!(
                            "repair of {log} [{start}, {end}] is blocked by an overlapping repair"
                        ))
                        .into());
                    }
                },
                None => released.await,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Progress {
    actions: Vec<RepairAction>,
    unrepairable: Vec<UnrepairableIssue>,
}

/// Repairs broken hash chains.
pub struct RepairEngine {
    accessor: Arc<dyn EventAccessor>,
    verifier: Arc<ChainVerifier>,
    state: StateStore,
    keyring: Arc<RwLock<SignatureVerifier>>,
    policy: RepairPolicy,
    locks: RangeLocks,
    ledger_lock: Mutex<()>,
}

impl fmt::Debug for RepairEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RepairEngine {
    /// Create a repair engine.
    #[must_use]
    pub fn new(
        accessor: Arc<dyn EventAccessor>,
        verifier: Arc<ChainVerifier>,
        state: StateStore,
        keyring: Arc<RwLock<SignatureVerifier>>,
        policy: RepairPolicy,
    ) -> Self {
        Self {
            accessor,
            verifier,
            state,
            keyring,
            policy,
            locks: RangeLocks::new(),
            ledger_lock: Mutex::new(()),
        }
    }

    /// Policy in force.
    #[must_use]
    pub fn policy(&self) -> RepairPolicy {
        self.policy
    }

    /// Repair `[start, end]` and re-verify it.
    ///
    /// Holds an exclusive lock on the range for the whole
    /// repair-then-reverify cycle. Per-event write failures become
    /// [`UnrepairableIssue`]s, and the rest of that span is reported as not
    /// attempted. A repair record is appended only after its overwrite went
    /// through; if the record cannot be persisted the superseded value is
    /// written back and the repair aborts.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for an invalid range,
    /// [`OperationalError::Timeout`] if the range lock cannot be taken
    /// before the deadline, and operational errors from the stores.
    pub async fn repair_hash_chain(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<RepairResult> {
        validate_range(start, end)?;
        let clock = Instant::now();
        let started_at = Utc::now();
        let _range = self.locks.acquire(log, start, end, opts.deadline).await?;

        let pre_repair = self.verifier.verify(log, start, end, opts).await?;
        let mut progress = Progress::default();

        for span in &pre_repair.broken_chains {
            match span.break_type {
                BreakType::MissingEvent => progress.unrepairable.push(UnrepairableIssue::from_span(
                    span,
                    "events are absent; reconstruct them or accept the gap",
                )),
                BreakType::HashMismatch | BreakType::InvalidHash if !span.repairable => {
                    progress.unrepairable.push(UnrepairableIssue::from_span(
                        span,
                        "event content is structurally invalid and cannot be hashed",
                    ));
                },
                BreakType::HashMismatch | BreakType::InvalidHash => {
                    self.repair_span(ctx, log, span, opts, &mut progress).await?;
                },
            }
        }

        let post_repair = self.verifier.verify(log, start, end, opts).await?;
        let success = post_repair.is_valid && !post_repair.truncated;
        let result = RepairResult {
            log_id: log.clone(),
            start_sequence: start,
            end_sequence: end,
            policy: self.policy,
            pre_repair,
            actions: progress.actions,
            unrepairable: progress.unrepairable,
            post_repair,
            success,
            started_at,
            duration_ms: elapsed_ms(clock),
        };

        if result.success {
            info!(
                log_id = %log,
                start,
                end,
                applied = result.applied(),
                policy = self.policy.as_str(),
                "Hash chain repaired"
            );
        } else {
            warn!(
                log_id = %log,
                start,
                end,
                applied = result.applied(),
                unrepairable = result.unrepairable.len(),
                "Hash chain repair incomplete"
            );
        }
        if let Some(tail) = &result.post_repair.tail
            && result.applied() > 0
            && let Some(latest) = self.accessor.get_latest_sequence(log).await?
            && latest > tail.sequence
        {
            warn!(
                log_id = %log,
                from = tail.sequence.saturating_add(1),
                "Events after the repaired range may link to superseded hashes"
            );
        }
        Ok(result)
    }

    async fn repair_span(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        span: &BrokenChain,
        opts: &CheckOptions,
        progress: &mut Progress,
    ) -> IntegrityResult<()> {
        let mut running = self.verifier.resolve_seed(log, span.start_sequence).await?;
        let mut pager = RangePager::new(
            self.accessor.as_ref(),
            log,
            span.start_sequence,
            span.end_sequence,
            opts.batch_size,
        );

        while let Some(page) = pager.next_page().await? {
            for group in page.groups {
                if let Some(reason) = opts.stop_reason() {
                    progress.unrepairable.push(UnrepairableIssue::remainder(
                        span,
                        group.sequence,
                        format!("repair stopped early: {reason:?}"),
                        false,
                    ));
                    return Ok(());
                }

                let Some(first) = group.events.first() else {
                    progress.unrepairable.push(UnrepairableIssue::remainder(
                        span,
                        group.sequence,
                        "event could not be read",
                        true,
                    ));
                    return Ok(());
                };
                let seed = running.unwrap_or(first.previous_hash);
                let sequence = group.sequence;
                let event = choose_candidate(group.events, &seed);
                match self.repair_event(ctx, log, event, seed, span.break_type, progress).await? {
                    Some(hash) => running = Some(hash),
                    None => {
                        if let Some(next) = sequence.checked_add(1).filter(|n| *n <= span.end_sequence) {
                            progress.unrepairable.push(UnrepairableIssue::remainder(
                                span,
                                next,
                                format!("not attempted: sequence {sequence} could not be healed"),
                                true,
                            ));
                        }
                        return Ok(());
                    },
                }
            }
        }
        Ok(())
    }

    /// Heal one event against `running`. Returns its new hash, or `None`
    /// after recording why it could not be healed.
    async fn repair_event(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        mut event: AuditEvent,
        running: ContentHash,
        break_type: BreakType,
        progress: &mut Progress,
    ) -> IntegrityResult<Option<ContentHash>> {
        if event.previous_hash != running {
            let applied = self
                .overwrite(ctx, log, &event, RepairActionKind::RebuildLink, event.previous_hash, running, progress)
                .await?;
            if !applied {
                progress
                    .unrepairable
                    .push(single_issue(&event, break_type, "previous hash could not be rewritten"));
                return Ok(None);
            }
            event.previous_hash = running;
        }

        let computed = match compute_hash(&event, &running) {
            Ok(hash) => hash,
            Err(e) => {
                progress.actions.push(RepairAction {
                    event_id: event.id,
                    sequence: event.sequence,
                    kind: RepairActionKind::Skip,
                    before: event.content_hash,
                    after: None,
                    success: false,
                    error: Some(e.to_string()),
                    record_position: None,
                });
                progress
                    .unrepairable
                    .push(single_issue(&event, break_type, e.to_string()));
                return Ok(None);
            },
        };

        if computed != event.content_hash {
            let applied = self
                .overwrite(ctx, log, &event, RepairActionKind::RecalculateHash, event.content_hash, computed, progress)
                .await?;
            if !applied {
                progress
                    .unrepairable
                    .push(single_issue(&event, break_type, "content hash could not be rewritten"));
                return Ok(None);
            }
        }
        Ok(Some(computed))
    }

    /// Perform one overwrite and then record it (per policy). Returns
    /// whether the accessor accepted the write.
    #[allow(clippy::too_many_arguments)]
    async fn overwrite(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        event: &AuditEvent,
        kind: RepairActionKind,
        before: ContentHash,
        after: ContentHash,
        progress: &mut Progress,
    ) -> IntegrityResult<bool> {
        if let Err(e) = self.write(log, &event.id, kind, after).await {
            warn!(log_id = %log, sequence = event.sequence, error = %e, "Repair write failed");
            progress.actions.push(RepairAction {
                event_id: event.id,
                sequence: event.sequence,
                kind,
                before,
                after: None,
                success: false,
                error: Some(e.to_string()),
                record_position: None,
            });
            return Ok(false);
        }

        let record_position = match self.policy {
            RepairPolicy::RecordSuperseded => {
                match self.append_record(ctx, log, event, kind, before, after).await {
                    Ok(record) => Some(record.position),
                    Err(e) => {
                        warn!(
                            log_id = %log,
                            sequence = event.sequence,
                            error = %e,
                            "Repair record not persisted, restoring superseded value"
                        );
                        if let Err(undo) = self.write(log, &event.id, kind, before).await {
                            error!(
                                log_id = %log,
                                sequence = event.sequence,
                                error = %undo,
                                "Superseded value could not be restored"
                            );
                        }
                        return Err(e);
                    },
                }
            },
            RepairPolicy::InPlace => None,
        };

        debug!(
            log_id = %log,
            sequence = event.sequence,
            action = kind.as_str(),
            before = %before.short_hex(),
            after = %after.short_hex(),
            "Repair applied"
        );
        progress.actions.push(RepairAction {
            event_id: event.id,
            sequence: event.sequence,
            kind,
            before,
            after: Some(after),
            success: true,
            error: None,
            record_position,
        });
        Ok(true)
    }

    async fn write(
        &self,
        log: &LogId,
        id: &EventId,
        kind: RepairActionKind,
        value: ContentHash,
    ) -> Result<(), AccessorError> {
        match kind {
            RepairActionKind::RebuildLink => self.accessor.update_previous_hash(log, id, value).await,
            RepairActionKind::RecalculateHash | RepairActionKind::Skip => {
                self.accessor.update_event_hash(log, id, value).await
            },
        }
    }

    async fn append_record(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        event: &AuditEvent,
        action: RepairActionKind,
        superseded_hash: ContentHash,
        replacement_hash: ContentHash,
    ) -> IntegrityResult<RepairRecord> {
        let ns = self.state.scoped(REPAIRS_PREFIX, log)?;
        let _guard = self.ledger_lock.lock().await;
        let (position, previous_hash) = ledger::next_slot::<RepairRecord>(&ns).await?;
        let keyring = self.keyring.read().await;

        let mut record = RepairRecord {
            id: Uuid::new_v4(),
            log_id: log.clone(),
            position,
            event_id: event.id,
            sequence: event.sequence,
            action,
            superseded_hash,
            replacement_hash,
            request_id: ctx.request_id,
            correlation_id: ctx.correlation_id,
            initiator: ctx.initiator.clone(),
            signer_key_id: keyring.active_key_id().to_string(),
            recorded_at: Utc::now(),
            previous_hash,
            record_hash: ContentHash::zero(),
            signature: Signature::unsigned(),
        };
        record.record_hash = record.content_hash();
        let (_, signature) = keyring.sign(&record.record_hash);
        record.signature = signature;

        ledger::append(&ns, &record).await?;
        Ok(record)
    }

    /// Every repair record of `log`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn repair_records(&self, log: &LogId) -> IntegrityResult<Vec<RepairRecord>> {
        ledger::read_all(&self.state.scoped(REPAIRS_PREFIX, log)?).await
    }

    /// Check links and signatures of `log`'s repair ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn verify_repair_records(&self, log: &LogId) -> IntegrityResult<LedgerVerification> {
        let records = self.repair_records(log).await?;
        let mut issues = ledger::verify_links(&records);
        let keyring = self.keyring.read().await;

        for record in &records {
            let verdict = record.signer().and_then(|key_id| {
                keyring
                    .verify(&key_id, &record.record_hash, &record.signature)
                    .map_err(|e| e.to_string())
            });
            if let Err(reason) = verdict {
                warn!(log_id = %log, position = record.position, %reason, "Repair record signature invalid");
                issues.push(LedgerIssue::InvalidSignature {
                    position: record.position,
                    reason,
                });
            }
        }
        issues.sort_by_key(issue_position);

        Ok(LedgerVerification::from_issues(
            u64::try_from(records.len()).unwrap_or(u64::MAX),
            issues,
        ))
    }
}

fn issue_position(issue: &LedgerIssue) -> u64 {
    match issue {
        LedgerIssue::PositionGap { actual, .. } => *actual,
        LedgerIssue::HashMismatch { position }
        | LedgerIssue::BrokenLink { position, .. }
        | LedgerIssue::InvalidSignature { position, .. } => *position,
    }
}

/// Among events sharing a sequence prefer the one already linked to `seed`.
fn choose_candidate(mut events: Vec<AuditEvent>, seed: &ContentHash) -> AuditEvent {
    let chosen = events
        .iter()
        .position(|e| matches!(compute_hash(e, seed), Ok(h) if h == e.content_hash))
        .or_else(|| events.iter().position(|e| &e.previous_hash == seed))
        .unwrap_or(0);
    events.swap_remove(chosen)
}

fn single_issue(event: &AuditEvent, break_type: BreakType, reason: impl Into<String>) -> UnrepairableIssue {
    UnrepairableIssue {
        start_sequence: event.sequence,
        end_sequence: event.sequence,
        break_type,
        affected_events: vec![event.id],
        reason: reason.into(),
        requires_manual_action: true,
    }
}
