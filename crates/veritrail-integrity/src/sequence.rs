//! Sequence auditor: gaps, duplicates and chronological order, independent
//! of hash content.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accessor::EventAccessor;
use crate::error::IntegrityResult;
use crate::event::{AuditEvent, EventId, LogId};
use crate::options::{CheckOptions, RangePager, validate_range};
use crate::severity::Severity;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// A maximal run of absent sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGap {
    /// First missing sequence.
    pub start: u64,
    /// Last missing sequence (inclusive).
    pub end: u64,
    /// `end - start + 1`.
    pub gap_size: u64,
    /// Severity by size.
    pub severity: Severity,
    /// Suggested remediation.
    pub remediation: String,
}

impl SequenceGap {
    fn new(start: u64, end: u64) -> Self {
        let gap_size = end.saturating_sub(start).saturating_add(1);
        let severity = match gap_size {
            100.. => Severity::Critical,
            10..=99 => Severity::High,
            _ => Severity::Medium,
        };
        let remediation = if gap_size == 1 {
            format!("Restore event {start} from backup or record it as an accepted gap")
        } else {
            format!(
                "Restore events {start}..={end} from backup or record them as an accepted gap"
            )
        };
        Self {
            start,
            end,
            gap_size,
            severity,
            remediation,
        }
    }
}

/// Several distinct events stored under one sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSequence {
    /// The shared sequence.
    pub sequence: u64,
    /// Distinct event ids found there.
    pub event_ids: Vec<EventId>,
    /// Severity by group size.
    pub severity: Severity,
    /// Suggested remediation.
    pub remediation: String,
}

impl DuplicateSequence {
    fn new(sequence: u64, event_ids: Vec<EventId>) -> Self {
        let severity = match event_ids.len() {
            0..=2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        };
        let remediation = format!(
            "Determine which of the {} events at sequence {sequence} is authentic and \
             quarantine the others",
            event_ids.len()
        );
        Self {
            sequence,
            event_ids,
            severity,
            remediation,
        }
    }

    /// Number of events sharing the sequence.
    #[must_use]
    pub fn count(&self) -> usize {
        self.event_ids.len()
    }
}

/// A timestamp that moves backwards by more than the tolerated skew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIssue {
    /// Sequence of the event that regressed.
    pub sequence: u64,
    /// Its id.
    pub event_id: EventId,
    /// Its timestamp.
    pub timestamp: DateTime<Utc>,
    /// Nearest preceding present sequence.
    pub previous_sequence: u64,
    /// Timestamp of that event.
    pub previous_timestamp: DateTime<Utc>,
    /// How far back the timestamp went, in milliseconds.
    pub regression_ms: i64,
    /// Severity by regression size.
    pub severity: Severity,
    /// Suggested remediation.
    pub remediation: String,
}

/// Findings of one auditor pass over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFindings<T> {
    /// Log audited.
    pub log_id: LogId,
    /// First sequence covered.
    pub start: u64,
    /// Last sequence covered.
    pub end: u64,
    /// Findings in sequence order.
    pub findings: Vec<T>,
    /// The pass stopped early.
    pub truncated: bool,
}

impl<T> SequenceFindings<T> {
    /// No findings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Parameters for order validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderCriteria {
    /// First sequence.
    pub start: u64,
    /// Last sequence.
    pub end: u64,
    /// Override of the configured clock-skew tolerance.
    pub clock_skew_ms: Option<u64>,
}

impl OrderCriteria {
    /// Validate `[start, end]` with the configured tolerance.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            clock_skew_ms: None,
        }
    }

    /// Use `ms` as the tolerance.
    #[must_use]
    pub fn with_clock_skew_ms(mut self, ms: u64) -> Self {
        self.clock_skew_ms = Some(ms);
        self
    }
}

// ---------------------------------------------------------------------------
// Auditor
// ---------------------------------------------------------------------------

/// Auditor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditorSettings {
    /// Timestamp regressions up to this many milliseconds are tolerated.
    pub clock_skew_ms: u64,
}

impl Default for AuditorSettings {
    fn default() -> Self {
        Self {
            clock_skew_ms: 5_000,
        }
    }
}

impl From<&veritrail_config::IntegrityConfig> for AuditorSettings {
    fn from(config: &veritrail_config::IntegrityConfig) -> Self {
        Self {
            clock_skew_ms: config.sequence.clock_skew_ms,
        }
    }
}

/// Detects gaps, duplicates and order violations.
pub struct SequenceAuditor {
    accessor: Arc<dyn EventAccessor>,
    settings: AuditorSettings,
}

impl std::fmt::Debug for SequenceAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAuditor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SequenceAuditor {
    /// Create an auditor.
    #[must_use]
    pub fn new(accessor: Arc<dyn EventAccessor>, settings: AuditorSettings) -> Self {
        Self { accessor, settings }
    }

    /// Report every maximal run of missing sequences in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad range and operational errors
    /// from the accessor.
    pub async fn detect_gaps(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<SequenceGap>> {
        validate_range(start, end)?;
        let mut pager = RangePager::new(self.accessor.as_ref(), log, start, end, opts.batch_size);
        let mut gaps: Vec<SequenceGap> = Vec::new();
        let mut expected = start;
        let mut processed_to = start.saturating_sub(1);
        let mut truncated = false;

        'pages: loop {
            if opts.stop_reason().is_some() {
                truncated = true;
                break;
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };
            for group in &page.groups {
                if opts.stop_reason().is_some() {
                    truncated = true;
                    break 'pages;
                }
                if group.sequence > expected {
                    gaps.push(SequenceGap::new(expected, group.sequence.saturating_sub(1)));
                }
                expected = group.sequence.saturating_add(1);
                processed_to = group.sequence;
            }
            processed_to = page.end;
        }
        if !truncated && expected <= end {
            gaps.push(SequenceGap::new(expected, end));
        }

        let total_missing: u64 = gaps.iter().map(|g| g.gap_size).sum();
        if gaps.is_empty() {
            info!(log_id = %log, start, end = processed_to, "No sequence gaps");
        } else {
            warn!(
                log_id = %log,
                start,
                end = processed_to,
                gaps = gaps.len(),
                missing = total_missing,
                "Sequence gaps detected"
            );
        }
        Ok(SequenceFindings {
            log_id: log.clone(),
            start,
            end: processed_to,
            findings: gaps,
            truncated,
        })
    }

    /// Report every sequence in `[start, end]` holding more than one
    /// distinct event id.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad range and operational errors
    /// from the accessor.
    pub async fn detect_duplicates(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<DuplicateSequence>> {
        validate_range(start, end)?;
        let mut pager = RangePager::new(self.accessor.as_ref(), log, start, end, opts.batch_size);
        let mut duplicates = Vec::new();
        let mut processed_to = start.saturating_sub(1);
        let mut truncated = false;

        'pages: loop {
            if opts.stop_reason().is_some() {
                truncated = true;
                break;
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };
            for group in &page.groups {
                if opts.stop_reason().is_some() {
                    truncated = true;
                    break 'pages;
                }
                let mut ids: Vec<EventId> = group.events.iter().map(|e| e.id).collect();
                ids.sort();
                ids.dedup();
                if ids.len() > 1 {
                    duplicates.push(DuplicateSequence::new(group.sequence, ids));
                }
                processed_to = group.sequence;
            }
            processed_to = page.end;
        }

        if !duplicates.is_empty() {
            warn!(
                log_id = %log,
                start,
                end = processed_to,
                duplicates = duplicates.len(),
                "Duplicate sequences detected"
            );
        }
        Ok(SequenceFindings {
            log_id: log.clone(),
            start,
            end: processed_to,
            findings: duplicates,
            truncated,
        })
    }

    /// Report timestamp regressions beyond the clock-skew tolerance. Each
    /// present event is compared with the nearest preceding present one;
    /// for duplicated sequences the first stored event is used.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad range and operational errors
    /// from the accessor.
    pub async fn validate_order(
        &self,
        log: &LogId,
        criteria: OrderCriteria,
        opts: &CheckOptions,
    ) -> IntegrityResult<SequenceFindings<OrderIssue>> {
        let OrderCriteria { start, end, .. } = criteria;
        validate_range(start, end)?;
        let skew_ms = criteria
            .clock_skew_ms
            .unwrap_or(self.settings.clock_skew_ms);
        let skew_ms = i64::try_from(skew_ms).unwrap_or(i64::MAX);

        let mut pager = RangePager::new(self.accessor.as_ref(), log, start, end, opts.batch_size);
        let mut issues = Vec::new();
        let mut previous: Option<(u64, DateTime<Utc>)> = None;
        let mut processed_to = start.saturating_sub(1);
        let mut truncated = false;

        'pages: loop {
            if opts.stop_reason().is_some() {
                truncated = true;
                break;
            }
            let Some(page) = pager.next_page().await? else {
                break;
            };
            for group in &page.groups {
                if opts.stop_reason().is_some() {
                    truncated = true;
                    break 'pages;
                }
                let Some(event) = group.events.first() else {
                    continue;
                };
                if let Some((prev_seq, prev_ts)) = previous
                    && let Some(issue) = order_issue(event, prev_seq, prev_ts, skew_ms)
                {
                    issues.push(issue);
                }
                previous = Some((event.sequence, event.timestamp));
                processed_to = group.sequence;
            }
            processed_to = page.end;
        }

        if !issues.is_empty() {
            warn!(
                log_id = %log,
                start,
                end = processed_to,
                issues = issues.len(),
                "Timestamp order violations detected"
            );
        }
        Ok(SequenceFindings {
            log_id: log.clone(),
            start,
            end: processed_to,
            findings: issues,
            truncated,
        })
    }
}

fn order_issue(
    event: &AuditEvent,
    prev_seq: u64,
    prev_ts: DateTime<Utc>,
    skew_ms: i64,
) -> Option<OrderIssue> {
    let regression_ms = prev_ts
        .signed_duration_since(event.timestamp)
        .num_milliseconds();
    if regression_ms <= skew_ms {
        return None;
    }
    let severity = match regression_ms {
        86_400_000.. => Severity::Critical,
        3_600_000..=86_399_999 => Severity::High,
        _ => Severity::Medium,
    };
    Some(OrderIssue {
        sequence: event.sequence,
        event_id: event.id,
        timestamp: event.timestamp,
        previous_sequence: prev_seq,
        previous_timestamp: prev_ts,
        regression_ms,
        severity,
        remediation: format!(
            "Check the clock of the writer that produced sequence {}; if it is correct, \
             investigate whether the event was inserted out of order",
            event.sequence
        ),
    })
}
