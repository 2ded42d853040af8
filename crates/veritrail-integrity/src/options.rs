//! Per-call limits shared by every range operation, and the pager that
//! enforces them.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accessor::{EventAccessor, MalformedEvent, StoredRange};
use crate::error::{IntegrityError, IntegrityResult};
use crate::event::{AuditEvent, LogId};

/// Default number of sequences fetched per accessor call.
pub const DEFAULT_BATCH_SIZE: u64 = 500;

/// Deadline, cancellation and paging for one operation.
///
/// Range operations check the deadline and the token between events. When
/// either fires they stop, mark their result `truncated`, and report the
/// last sequence they actually processed as the end of their scope.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Stop once this instant has passed.
    pub deadline: Option<Instant>,
    /// Stop once this token is cancelled.
    pub cancel: Option<CancellationToken>,
    /// Sequences fetched per accessor call.
    pub batch_size: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            cancel: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Why an operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The deadline passed.
    Deadline,
    /// The cancellation token fired.
    Cancelled,
}

impl CheckOptions {
    /// Options with no limits and the default batch size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop `timeout` from now. A timeout too large to represent means no
    /// deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fetch `batch_size` sequences per accessor call (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Whether the operation should stop now.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(StopReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::Deadline);
        }
        None
    }
}

/// Reject empty or zero-based ranges.
///
/// # Errors
///
/// Returns [`IntegrityError::Validation`] when `start` is 0 or `start > end`.
pub fn validate_range(start: u64, end: u64) -> IntegrityResult<()> {
    if start == 0 {
        return Err(IntegrityError::Validation(
            "sequences start at 1; start must be at least 1".into(),
        ));
    }
    if start > end {
        return Err(IntegrityError::Validation(format!(
            "start ({start}) must not exceed end ({end})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

/// Entries stored at one sequence, in accessor order. A group always holds
/// at least one decoded event or one malformed entry.
#[derive(Debug)]
pub(crate) struct SequenceGroup {
    pub(crate) sequence: u64,
    pub(crate) events: Vec<AuditEvent>,
    pub(crate) malformed: Vec<MalformedEvent>,
}

impl SequenceGroup {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            events: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

/// One page of the range: `[start, end]` and the groups found inside it.
#[derive(Debug)]
pub(crate) struct Page {
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) groups: Vec<SequenceGroup>,
}

/// Walks `[start, end]` in fixed-size sequence windows.
pub(crate) struct RangePager<'a> {
    accessor: &'a dyn EventAccessor,
    log: &'a LogId,
    next: Option<u64>,
    end: u64,
    batch_size: u64,
}

impl<'a> RangePager<'a> {
    pub(crate) fn new(
        accessor: &'a dyn EventAccessor,
        log: &'a LogId,
        start: u64,
        end: u64,
        batch_size: u64,
    ) -> Self {
        Self {
            accessor,
            log,
            next: (start <= end).then_some(start),
            end,
            batch_size: batch_size.max(1),
        }
    }

    pub(crate) async fn next_page(&mut self) -> IntegrityResult<Option<Page>> {
        let Some(start) = self.next else {
            return Ok(None);
        };
        let end = start
            .saturating_add(self.batch_size.saturating_sub(1))
            .min(self.end);
        self.next = if end >= self.end {
            None
        } else {
            end.checked_add(1)
        };

        let range = self
            .accessor
            .read_sequence_range(self.log, start, end)
            .await?;
        Ok(Some(Page {
            start,
            end,
            groups: group_by_sequence(range, start, end),
        }))
    }
}

/// Group sorted-or-not entries by sequence, dropping any the accessor
/// returned outside `[start, end]`.
pub(crate) fn group_by_sequence(range: StoredRange, start: u64, end: u64) -> Vec<SequenceGroup> {
    let within = move |sequence: u64| (start..=end).contains(&sequence);
    let mut groups: BTreeMap<u64, SequenceGroup> = BTreeMap::new();
    for event in range.events.into_iter().filter(|e| within(e.sequence)) {
        groups
            .entry(event.sequence)
            .or_insert_with(|| SequenceGroup::new(event.sequence))
            .events
            .push(event);
    }
    for entry in range.malformed.into_iter().filter(|m| within(m.sequence)) {
        groups
            .entry(entry.sequence)
            .or_insert_with(|| SequenceGroup::new(entry.sequence))
            .malformed
            .push(entry);
    }
    groups.into_values().collect()
}
