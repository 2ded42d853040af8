//! Narrow capability traits over the engine's components.
//!
//! The monitor and the engine facade depend on these rather than on the
//! concrete components, so each algorithm can be swapped or faked on its
//! own.

use async_trait::async_trait;
use veritrail_crypto::ContentHash;
use veritrail_telemetry::RequestContext;

use crate::error::IntegrityResult;
use crate::event::LogId;
use crate::options::CheckOptions;
use crate::repair::{RepairEngine, RepairResult};
use crate::scanner::{CorruptionCriteria, CorruptionReport, CorruptionScanner};
use crate::sequence::{
    DuplicateSequence, OrderCriteria, OrderIssue, SequenceAuditor, SequenceFindings, SequenceGap,
};
use crate::verifier::{ChainVerifier, VerificationResult};

/// Hash-chain verification.
#[async_trait]
pub trait VerifyChain: Send + Sync {
    /// Verify `[start, end]`.
    async fn verify_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult>;

    /// Verify at most `limit` sequences after `from_seq`, seeded with
    /// `seed` when known.
    async fn verify_from(
        &self,
        log: &LogId,
        from_seq: u64,
        seed: Option<ContentHash>,
        limit: Option<u64>,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult>;
}

/// Gap, duplicate and order auditing.
#[async_trait]
pub trait AuditSequence: Send + Sync {
    /// Maximal runs of missing sequences.
    async fn gaps(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<SequenceGap>>;

    /// Sequences held by more than one event.
    async fn duplicates(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<DuplicateSequence>>;

    /// Timestamp regressions.
    async fn order(
        &self,
        log: &LogId,
        criteria: OrderCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<OrderIssue>>;
}

/// Field-level corruption scanning.
#[async_trait]
pub trait DetectCorruption: Send + Sync {
    /// Scan per `criteria`.
    async fn scan(
        &self,
        log: &LogId,
        criteria: &CorruptionCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<CorruptionReport>;
}

/// Hash-chain repair.
#[async_trait]
pub trait RepairChain: Send + Sync {
    /// Repair and re-verify `[start, end]`.
    async fn repair(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<RepairResult>;
}

#[async_trait]
impl VerifyChain for ChainVerifier {
    async fn verify_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        self.verify(log, start, end, opts).await
    }

    async fn verify_from(
        &self,
        log: &LogId,
        from_seq: u64,
        seed: Option<ContentHash>,
        limit: Option<u64>,
        opts: &CheckOptions,
    ) -> IntegrityResult<VerificationResult> {
        self.verify_incremental(log, from_seq, seed, limit, opts)
            .await
    }
}

#[async_trait]
impl AuditSequence for SequenceAuditor {
    async fn gaps(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<SequenceGap>> {
        self.detect_gaps(log, start, end, opts).await
    }

    async fn duplicates(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<DuplicateSequence>> {
        self.detect_duplicates(log, start, end, opts).await
    }

    async fn order(
        &self,
        log: &LogId,
        criteria: OrderCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<OrderIssue>> {
        self.validate_order(log, criteria, opts).await
    }
}

#[async_trait]
impl DetectCorruption for CorruptionScanner {
    async fn scan(
        &self,
        log: &LogId,
        criteria: &CorruptionCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<CorruptionReport> {
        self.detect_corruption(log, criteria, opts).await
    }
}

#[async_trait]
impl RepairChain for RepairEngine {
    async fn repair(
        &self,
        ctx: &RequestContext,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<RepairResult> {
        self.repair_hash_chain(ctx, log, start, end, opts).await
    }
}
