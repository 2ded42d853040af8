//! Integrity report composition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerts::Alert;
use crate::event::LogId;
use crate::scanner::{CorruptionLevel, CorruptionReport};
use crate::sequence::{DuplicateSequence, OrderIssue, SequenceGap};
use crate::state::ChainHead;
use crate::verifier::{BreakType, VerificationResult};

/// Overall verdict of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Chain valid, nothing outstanding.
    Intact,
    /// Chain valid, but findings or open alerts need attention.
    Degraded,
    /// The chain cannot be proven valid, or corruption is high.
    Compromised,
}

impl ReportStatus {
    /// Lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intact => "intact",
            Self::Degraded => "degraded",
            Self::Compromised => "compromised",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Results gathered for one report.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    /// Full verification of the range.
    pub verification: VerificationResult,
    /// Gaps in the range.
    pub gaps: Vec<SequenceGap>,
    /// Duplicated sequences in the range.
    pub duplicates: Vec<DuplicateSequence>,
    /// Timestamp regressions in the range.
    pub order_issues: Vec<OrderIssue>,
    /// Corruption scan of the range.
    pub corruption: CorruptionReport,
    /// Persisted head of the log.
    pub chain_head: Option<ChainHead>,
    /// Unacknowledged alerts of the log.
    pub open_alerts: Vec<Alert>,
    /// Any component stopped early.
    pub truncated: bool,
}

/// Serialisable summary of a log's integrity over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Report id.
    pub id: Uuid,
    /// Request that produced the report.
    pub request_id: Uuid,
    /// Correlation id of that request.
    pub correlation_id: Uuid,
    /// Log reported on.
    pub log_id: LogId,
    /// First sequence covered.
    pub start: u64,
    /// Last sequence covered.
    pub end: u64,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Overall verdict.
    pub status: ReportStatus,
    /// Chain verification.
    pub verification: VerificationResult,
    /// Gaps.
    pub gaps: Vec<SequenceGap>,
    /// Duplicates.
    pub duplicates: Vec<DuplicateSequence>,
    /// Order issues.
    pub order_issues: Vec<OrderIssue>,
    /// Corruption scan.
    pub corruption: CorruptionReport,
    /// Persisted head.
    pub chain_head: Option<ChainHead>,
    /// Open alerts.
    pub open_alerts: Vec<Alert>,
    /// Any component stopped early; counts cover less than the range.
    pub truncated: bool,
    /// Suggested follow-up actions, most urgent first.
    pub recommendations: Vec<String>,
}

impl IntegrityReport {
    /// Derive status and recommendations from gathered results.
    #[must_use]
    pub fn compose(
        log_id: LogId,
        start: u64,
        end: u64,
        request_id: Uuid,
        correlation_id: Uuid,
        inputs: ReportInputs,
    ) -> Self {
        let status = status_of(&inputs);
        let recommendations = recommendations_for(&inputs);
        Self {
            id: Uuid::new_v4(),
            request_id,
            correlation_id,
            log_id,
            start,
            end,
            generated_at: Utc::now(),
            status,
            verification: inputs.verification,
            gaps: inputs.gaps,
            duplicates: inputs.duplicates,
            order_issues: inputs.order_issues,
            corruption: inputs.corruption,
            chain_head: inputs.chain_head,
            open_alerts: inputs.open_alerts,
            truncated: inputs.truncated,
            recommendations,
        }
    }

    /// Whether the report is [`ReportStatus::Intact`].
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.status == ReportStatus::Intact
    }
}

fn status_of(inputs: &ReportInputs) -> ReportStatus {
    if !inputs.verification.is_valid
        || !inputs.duplicates.is_empty()
        || inputs.corruption.level >= CorruptionLevel::High
    {
        return ReportStatus::Compromised;
    }
    let head_unhealthy = inputs.chain_head.as_ref().is_some_and(|h| !h.healthy);
    if !inputs.gaps.is_empty()
        || !inputs.order_issues.is_empty()
        || inputs.corruption.level > CorruptionLevel::None
        || !inputs.open_alerts.is_empty()
        || inputs.truncated
        || head_unhealthy
    {
        return ReportStatus::Degraded;
    }
    ReportStatus::Intact
}

fn recommendations_for(inputs: &ReportInputs) -> Vec<String> {
    let mut out = Vec::new();
    let v = &inputs.verification;

    let mismatched: Vec<_> = v.spans_of(BreakType::HashMismatch).collect();
    if !mismatched.is_empty() {
        out.push(format!(
            "Investigate {} hash mismatch span(s) starting at sequence {} before repairing; \
             repair records preserve the superseded hashes",
            mismatched.len(),
            mismatched[0].start_sequence
        ));
    }
    let invalid = v.spans_of(BreakType::InvalidHash).count();
    if invalid > 0 {
        out.push(format!(
            "Recompute {invalid} span(s) with zero or unhashable stored hashes"
        ));
    }
    if !inputs.gaps.is_empty() {
        let missing: u64 = inputs.gaps.iter().map(|g| g.gap_size).fold(0, u64::saturating_add);
        out.push(format!(
            "Restore {missing} missing event(s) across {} gap(s) from backup; missing events cannot be repaired",
            inputs.gaps.len()
        ));
    }
    if !inputs.duplicates.is_empty() {
        out.push(format!(
            "Review {} duplicated sequence(s) and remove the events that fail verification",
            inputs.duplicates.len()
        ));
    }
    if !inputs.order_issues.is_empty() {
        out.push(format!(
            "Check clock synchronisation of writers; {} timestamp regression(s) exceed tolerance",
            inputs.order_issues.len()
        ));
    }
    if inputs.corruption.level > CorruptionLevel::None {
        let review = inputs.corruption.review_candidates().count();
        out.push(format!(
            "Corruption level {:?}: {} confirmed event(s), {review} finding(s) flagged for review",
            inputs.corruption.level, inputs.corruption.corrupted_events
        ));
    }
    if !inputs.open_alerts.is_empty() {
        out.push(format!(
            "Acknowledge {} open alert(s) once investigated",
            inputs.open_alerts.len()
        ));
    }
    if inputs.truncated {
        out.push("Re-run with a longer deadline; the report covers a partial range".to_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CheckOptions;
    use crate::scanner::{CorruptionCriteria, CorruptionScanner, ScannerSettings};
    use crate::sequence::{AuditorSettings, OrderCriteria, SequenceAuditor};
    use crate::testing::{TestLog, log_id};
    use crate::verifier::{ChainVerifier, VerifierSettings};
    use veritrail_crypto::ContentHash;

    async fn gather(log: &TestLog, start: u64, end: u64) -> ReportInputs {
        let opts = CheckOptions::new();
        let verifier = ChainVerifier::new(log.accessor(), VerifierSettings::default());
        let auditor = SequenceAuditor::new(log.accessor(), AuditorSettings::default());
        let scanner = CorruptionScanner::new(log.accessor(), ScannerSettings::default());
        ReportInputs {
            verification: verifier.verify(&log_id(), start, end, &opts).await.unwrap(),
            gaps: auditor.detect_gaps(&log_id(), start, end, &opts).await.unwrap().findings,
            duplicates: auditor
                .detect_duplicates(&log_id(), start, end, &opts)
                .await
                .unwrap()
                .findings,
            order_issues: auditor
                .validate_order(&log_id(), OrderCriteria::new(start, end), &opts)
                .await
                .unwrap()
                .findings,
            corruption: scanner
                .detect_corruption(&log_id(), &CorruptionCriteria::new(start, end), &opts)
                .await
                .unwrap(),
            chain_head: None,
            open_alerts: Vec::new(),
            truncated: false,
        }
    }

    fn compose(inputs: ReportInputs) -> IntegrityReport {
        IntegrityReport::compose(log_id(), 1, 10, Uuid::new_v4(), Uuid::new_v4(), inputs)
    }

    #[tokio::test]
    async fn test_intact_chain() {
        let log = TestLog::with_chain(10).await;
        let report = compose(gather(&log, 1, 10).await);
        assert_eq!(report.status, ReportStatus::Intact);
        assert!(report.is_intact());
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_chain_is_compromised() {
        let log = TestLog::with_chain(10).await;
        log.set_stored_hash(4, ContentHash::hash(b"x")).await;
        let report = compose(gather(&log, 1, 10).await);
        assert_eq!(report.status, ReportStatus::Compromised);
        assert!(report.recommendations[0].contains("hash mismatch"));
    }

    #[tokio::test]
    async fn test_missing_event_recommends_restore() {
        let log = TestLog::with_chain(10).await;
        log.delete(6).await;
        let report = compose(gather(&log, 1, 10).await);
        assert_eq!(report.status, ReportStatus::Compromised);
        assert!(report.recommendations.iter().any(|r| r.contains("Restore 1 missing")));
    }

    #[tokio::test]
    async fn test_unhealthy_head_or_truncation_degrades() {
        let log = TestLog::with_chain(10).await;
        let mut inputs = gather(&log, 1, 10).await;
        inputs.truncated = true;
        let report = compose(inputs);
        assert_eq!(report.status, ReportStatus::Degraded);
        assert!(report.recommendations.iter().any(|r| r.contains("longer deadline")));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::Compromised).unwrap(),
            "\"compromised\""
        );
        assert!(ReportStatus::Compromised > ReportStatus::Degraded);
    }
}
