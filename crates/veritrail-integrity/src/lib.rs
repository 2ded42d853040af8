//! Veritrail Integrity - tamper evidence for append-only audit logs.
//!
//! The engine reads sequence-numbered, hash-chained events through an
//! [`EventAccessor`] and provides:
//!
//! - [`ChainVerifier`]: full, incremental, sampled and partitioned chain
//!   verification, reporting broken spans as findings
//! - [`SequenceAuditor`]: gap, duplicate and timestamp-order audits
//! - [`CorruptionScanner`]: structural, referential, encoding and
//!   statistical checks on event fields
//! - [`RepairEngine`]: hash and link repair under an exclusive range lock,
//!   with signed records of every superseded value
//! - [`IntegrityMonitor`]: per-log background checks with checkpoints,
//!   retries and deduplicated alerts
//! - [`IntegrityEngine`]: the facade composing all of the above, with a
//!   self-audit [`OperationJournal`] of every mutation
//!
//! Discovered tampering is never an error. Broken chains, gaps, duplicates
//! and corruption are findings inside result objects; [`IntegrityError`]
//! is reserved for the operation itself failing.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veritrail_integrity::prelude::*;
//! use veritrail_storage::MemoryKvStore;
//! use veritrail_telemetry::RequestContext;
//!
//! # async fn run() -> IntegrityResult<()> {
//! let store = Arc::new(MemoryKvStore::new());
//! let accessor = Arc::new(KvEventAccessor::new(store.clone()));
//! let engine = IntegrityEngine::builder(accessor, store).build()?;
//!
//! let ctx = RequestContext::new("cli").with_initiator("alice");
//! let log = LogId::new("payments")?;
//! let result = engine.verify(&ctx, &log, 1, 1_000, &engine.check_options()).await?;
//! println!("valid={} score={}", result.is_valid, result.integrity_score);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod accessor;
mod alerts;
mod capability;
mod chain;
mod engine;
mod error;
mod event;
mod journal;
mod ledger;
mod monitor;
mod options;
mod repair;
mod report;
mod scanner;
mod sequence;
mod severity;
mod state;
mod verifier;
mod vocab;

#[cfg(test)]
mod testing;

pub use accessor::{
    AccessorError, AccessorResult, EventAccessor, KvEventAccessor, MalformedEvent, StoredRange,
    events_namespace,
};
pub use alerts::{
    Acknowledgement, Alert, AlertCheck, AlertKey, AlertManager, AlertSink, BroadcastAlertSink,
    DEFAULT_ALERT_CAPACITY, LogAlertSink, NewAlert, RaiseOutcome,
};
pub use capability::{AuditSequence, DetectCorruption, RepairChain, VerifyChain};
pub use chain::{EVENT_HASH_DOMAIN, GENESIS_HASH, compute_hash, seal, validate_linkage};
pub use engine::{IntegrityEngine, IntegrityEngineBuilder};
pub use error::{IntegrityError, IntegrityResult, OperationalError};
pub use event::{Actor, AuditEvent, ChainLink, EventId, LogId, MAX_LOG_ID_LEN, Target};
pub use journal::{
    KvOperationJournal, NewOperation, OperationJournal, OperationKind, OperationOutcome,
    OperationRecord,
};
pub use ledger::{LedgerIssue, LedgerVerification};
pub use monitor::{
    AlertThresholds, DueChecks, IntegrityMonitor, MonitorComponents, MonitorHandle, MonitorState,
    MonitorStatus, MonitoringConfig, RetryPolicy, TickReport,
};
pub use options::{CheckOptions, DEFAULT_BATCH_SIZE, StopReason, validate_range};
pub use repair::{
    RangeGuard, RangeLocks, RepairAction, RepairActionKind, RepairEngine, RepairPolicy,
    RepairRecord, RepairResult, UnrepairableIssue,
};
pub use report::{IntegrityReport, ReportInputs, ReportStatus};
pub use scanner::{
    CorruptionCriteria, CorruptionInstance, CorruptionLevel, CorruptionReport, CorruptionScanner,
    CorruptionType, RepairComplexity, ScannerSettings,
};
pub use sequence::{
    AuditorSettings, DuplicateSequence, OrderCriteria, OrderIssue, SequenceAuditor,
    SequenceFindings, SequenceGap,
};
pub use severity::Severity;
pub use state::{ChainHead, MonitorCheckpoints, MonitorRecord, StateStore};
pub use verifier::{
    BreakType, BrokenChain, ChainVerifier, VerificationMethod, VerificationResult,
    VerifierSettings,
};
pub use vocab::{ActorType, DataClass, EventResult, LegalBasis, TargetType};
