//! Operation journal.
//!
//! Every state-mutating operation the engine performs (repairs, alert
//! acknowledgements, monitoring configuration, monitor transitions out of
//! `AlertRaised`) is itself recorded as a hash-linked entry, so the
//! integrity subsystem leaves the same kind of trail it protects.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use veritrail_crypto::{CanonicalHasher, ContentHash};
use veritrail_telemetry::RequestContext;

use crate::error::IntegrityResult;
use crate::event::LogId;
use crate::ledger::{self, LedgerVerification, Linked};
use crate::state::StateStore;

const JOURNAL_PREFIX: &str = "veritrail:journal";
const RECORD_HASH_DOMAIN: &str = "veritrail 2026 operation-record v1";

/// Kind of journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `repair_hash_chain`.
    RepairHashChain,
    /// `acknowledge_alert`.
    AcknowledgeAlert,
    /// `setup_integrity_monitoring`.
    SetupMonitoring,
    /// A monitor was stopped.
    StopMonitoring,
    /// A monitor left the `AlertRaised` state.
    MonitorTransition,
}

impl OperationKind {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepairHashChain => "repair_hash_chain",
            Self::AcknowledgeAlert => "acknowledge_alert",
            Self::SetupMonitoring => "setup_monitoring",
            Self::StopMonitoring => "stop_monitoring",
            Self::MonitorTransition => "monitor_transition",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Completed.
    Succeeded,
    /// Did not complete.
    Failed(String),
}

/// An operation about to be journaled.
#[derive(Debug, Clone)]
pub struct NewOperation {
    /// Log the operation targeted.
    pub log_id: LogId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Human-readable detail.
    pub detail: String,
    /// Outcome.
    pub outcome: OperationOutcome,
}

impl NewOperation {
    /// A successful operation.
    #[must_use]
    pub fn succeeded(log_id: LogId, kind: OperationKind, detail: impl Into<String>) -> Self {
        Self {
            log_id,
            kind,
            detail: detail.into(),
            outcome: OperationOutcome::Succeeded,
        }
    }

    /// A failed operation.
    #[must_use]
    pub fn failed(
        log_id: LogId,
        kind: OperationKind,
        detail: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            log_id,
            kind,
            detail: detail.into(),
            outcome: OperationOutcome::Failed(reason.into()),
        }
    }
}

/// A journaled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Record id.
    pub id: Uuid,
    /// Log the operation targeted.
    pub log_id: LogId,
    /// 1-based position in the log's journal.
    pub position: u64,
    /// Operation kind.
    pub kind: OperationKind,
    /// Request that performed it.
    pub request_id: Uuid,
    /// Correlation id of the request.
    pub correlation_id: Uuid,
    /// Who asked for it.
    pub actor: Option<String>,
    /// Human-readable detail.
    pub detail: String,
    /// Outcome.
    pub outcome: OperationOutcome,
    /// When it was journaled.
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous record.
    pub previous_hash: ContentHash,
    /// Hash of this record.
    pub record_hash: ContentHash,
}

impl OperationRecord {
    fn content_hash(&self) -> ContentHash {
        let (status, reason) = match &self.outcome {
            OperationOutcome::Succeeded => ("succeeded", None),
            OperationOutcome::Failed(reason) => ("failed", Some(reason.as_str())),
        };
        let mut hasher = CanonicalHasher::new(RECORD_HASH_DOMAIN);
        hasher
            .bytes("id", self.id.as_bytes())
            .str("log_id", self.log_id.as_str())
            .u64("position", self.position)
            .str("kind", self.kind.as_str())
            .bytes("request_id", self.request_id.as_bytes())
            .bytes("correlation_id", self.correlation_id.as_bytes())
            .opt_str("actor", self.actor.as_deref())
            .str("detail", &self.detail)
            .str("status", status)
            .opt_str("reason", reason)
            .i64("recorded_at", self.recorded_at.timestamp())
            .u64(
                "recorded_at_nanos",
                u64::from(self.recorded_at.timestamp_subsec_nanos()),
            )
            .hash("previous", &self.previous_hash);
        hasher.finalize()
    }
}

impl Linked for OperationRecord {
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

/// Append-only record of the engine's own mutations.
#[async_trait]
pub trait OperationJournal: Send + Sync {
    /// Journal an operation performed under `ctx`.
    async fn record(&self, ctx: &RequestContext, op: NewOperation) -> IntegrityResult<OperationRecord>;

    /// Every record of `log`, oldest first.
    async fn records(&self, log: &LogId) -> IntegrityResult<Vec<OperationRecord>>;

    /// Check the hash links of `log`'s journal.
    async fn verify(&self, log: &LogId) -> IntegrityResult<LedgerVerification>;
}

/// [`OperationJournal`] over the engine's [`StateStore`].
pub struct KvOperationJournal {
    state: StateStore,
    append_lock: Mutex<()>,
}

impl KvOperationJournal {
    /// Create a journal.
    #[must_use]
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            append_lock: Mutex::new(()),
        }
    }
}

impl fmt::Debug for KvOperationJournal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvOperationJournal").finish_non_exhaustive()
    }
}

#[async_trait]
impl OperationJournal for KvOperationJournal {
    async fn record(&self, ctx: &RequestContext, op: NewOperation) -> IntegrityResult<OperationRecord> {
        let ns = self.state.scoped(JOURNAL_PREFIX, &op.log_id)?;
        let _guard = self.append_lock.lock().await;
        let (position, previous_hash) = ledger::next_slot::<OperationRecord>(&ns).await?;

        let mut record = OperationRecord {
            id: Uuid::new_v4(),
            log_id: op.log_id,
            position,
            kind: op.kind,
            request_id: ctx.request_id,
            correlation_id: ctx.correlation_id,
            actor: ctx.initiator.clone(),
            detail: op.detail,
            outcome: op.outcome,
            recorded_at: Utc::now(),
            previous_hash,
            record_hash: ContentHash::zero(),
        };
        record.record_hash = record.content_hash();
        ledger::append(&ns, &record).await?;

        info!(
            log_id = %record.log_id,
            kind = %record.kind,
            position,
            correlation_id = %record.correlation_id,
            "Operation journaled"
        );
        Ok(record)
    }

    async fn records(&self, log: &LogId) -> IntegrityResult<Vec<OperationRecord>> {
        let ns = self.state.scoped(JOURNAL_PREFIX, log)?;
        ledger::read_all(&ns).await
    }

    async fn verify(&self, log: &LogId) -> IntegrityResult<LedgerVerification> {
        let records = self.records(log).await?;
        let issues = ledger::verify_links(&records);
        debug!(log_id = %log, records = records.len(), issues = issues.len(), "Journal verified");
        Ok(LedgerVerification::from_issues(
            u64::try_from(records.len()).unwrap_or(u64::MAX),
            issues,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerIssue, position_key};
    use std::sync::Arc;
    use veritrail_storage::{MemoryKvStore, ScopedKvStore};

    fn journal() -> (KvOperationJournal, StateStore) {
        let state = StateStore::new(Arc::new(MemoryKvStore::new())).unwrap();
        (KvOperationJournal::new(state.clone()), state)
    }

    fn log() -> LogId {
        LogId::new("payments").unwrap()
    }

    #[tokio::test]
    async fn test_records_are_linked() {
        let (journal, _) = journal();
        let ctx = RequestContext::new("test").with_initiator("alice");

        let first = journal
            .record(&ctx, NewOperation::succeeded(log(), OperationKind::SetupMonitoring, "enabled"))
            .await
            .unwrap();
        let second = journal
            .record(
                &ctx,
                NewOperation::failed(log(), OperationKind::RepairHashChain, "1..=5", "missing event"),
            )
            .await
            .unwrap();

        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
        assert_eq!(second.previous_hash, first.record_hash);
        assert_eq!(second.actor.as_deref(), Some("alice"));
        assert_eq!(second.correlation_id, ctx.correlation_id);

        let check = journal.verify(&log()).await.unwrap();
        assert!(check.valid);
        assert_eq!(check.records_verified, 2);
    }

    #[tokio::test]
    async fn test_logs_have_separate_journals() {
        let (journal, _) = journal();
        let ctx = RequestContext::new("test");
        let other = LogId::new("sessions").unwrap();
        journal
            .record(&ctx, NewOperation::succeeded(log(), OperationKind::AcknowledgeAlert, "a"))
            .await
            .unwrap();
        let rec = journal
            .record(&ctx, NewOperation::succeeded(other.clone(), OperationKind::AcknowledgeAlert, "b"))
            .await
            .unwrap();
        assert_eq!(rec.position, 1);
        assert_eq!(journal.records(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tampered_record_is_detected() {
        let (journal, state) = journal();
        let ctx = RequestContext::new("test");
        for detail in ["one", "two", "three"] {
            journal
                .record(&ctx, NewOperation::succeeded(log(), OperationKind::StopMonitoring, detail))
                .await
                .unwrap();
        }

        let ns: ScopedKvStore = state.scoped(JOURNAL_PREFIX, &log()).unwrap();
        let mut record: OperationRecord = ns.get_json(&position_key(2)).await.unwrap().unwrap();
        record.detail = "rewritten".into();
        ns.set_json(&position_key(2), &record).await.unwrap();

        let check = journal.verify(&log()).await.unwrap();
        assert!(!check.valid);
        assert_eq!(check.issues, vec![LedgerIssue::HashMismatch { position: 2 }]);
    }
}
