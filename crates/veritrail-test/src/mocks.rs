//! Mock implementations for testing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use veritrail_crypto::ContentHash;
use veritrail_integrity::{
    AccessorError, AccessorResult, AuditEvent, EventAccessor, EventId, LogId,
};

#[derive(Debug, Default)]
struct Inner {
    /// Events per log, kept sorted by sequence.
    logs: BTreeMap<LogId, Vec<AuditEvent>>,
    /// Remaining calls that fail with `Unavailable`.
    outage: u32,
    /// Reads served.
    reads: u64,
    /// Hash writes applied.
    writes: u64,
}

impl Inner {
    fn events(&mut self, log: &LogId) -> &mut Vec<AuditEvent> {
        self.logs.entry(log.clone()).or_default()
    }

    fn find(&mut self, log: &LogId, id: &EventId) -> AccessorResult<&mut AuditEvent> {
        self.events(log)
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or_else(|| AccessorError::NotFound(format!("{log} event {id}")))
    }

    fn at(&mut self, log: &LogId, sequence: u64) -> Option<&mut AuditEvent> {
        self.events(log).iter_mut().find(|e| e.sequence == sequence)
    }

    /// Consume one outage call, if any remain.
    fn check_outage(&mut self) -> AccessorResult<()> {
        if self.outage > 0 {
            self.outage = self.outage.saturating_sub(1);
            return Err(AccessorError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

/// In-memory [`EventAccessor`] with fault injection.
///
/// Supports tampering, deletion, forged duplicates, timestamp regressions
/// and transient outages. Uses `std::sync::Mutex` internally so the
/// injection helpers work without a runtime.
#[derive(Debug, Clone, Default)]
pub struct FaultyAccessor {
    inner: Arc<Mutex<Inner>>,
}

impl FaultyAccessor {
    /// Create an empty accessor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accessor holding `events` under `log`.
    #[must_use]
    pub fn with_events(log: &LogId, events: Vec<AuditEvent>) -> Self {
        let accessor = Self::new();
        accessor.insert_all(log, events);
        accessor
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store one event.
    pub fn insert(&self, log: &LogId, event: AuditEvent) {
        let mut guard = self.lock();
        let events = guard.events(log);
        let at = events.partition_point(|e| e.sequence <= event.sequence);
        events.insert(at, event);
    }

    /// Store several events.
    pub fn insert_all(&self, log: &LogId, events: impl IntoIterator<Item = AuditEvent>) {
        for event in events {
            self.insert(log, event);
        }
    }

    /// First event stored at `sequence`.
    #[must_use]
    pub fn event_at(&self, log: &LogId, sequence: u64) -> Option<AuditEvent> {
        self.lock().at(log, sequence).cloned()
    }

    /// Every stored event of `log`, in sequence order.
    #[must_use]
    pub fn events(&self, log: &LogId) -> Vec<AuditEvent> {
        self.lock().events(log).clone()
    }

    // -- Fault injection --

    /// Mutate the first event at `sequence` without resealing it.
    /// Returns `false` when the sequence is absent.
    pub fn tamper(&self, log: &LogId, sequence: u64, f: impl FnOnce(&mut AuditEvent)) -> bool {
        match self.lock().at(log, sequence) {
            Some(event) => {
                f(event);
                true
            },
            None => false,
        }
    }

    /// Overwrite the stored content hash at `sequence`.
    pub fn set_stored_hash(&self, log: &LogId, sequence: u64, hash: ContentHash) -> bool {
        self.tamper(log, sequence, |e| e.content_hash = hash)
    }

    /// Move the timestamp at `sequence`.
    pub fn set_timestamp(&self, log: &LogId, sequence: u64, timestamp: DateTime<Utc>) -> bool {
        self.tamper(log, sequence, |e| e.timestamp = timestamp)
    }

    /// Remove every event at `sequence`. Returns how many were removed.
    pub fn delete(&self, log: &LogId, sequence: u64) -> usize {
        let mut guard = self.lock();
        let events = guard.events(log);
        let before = events.len();
        events.retain(|e| e.sequence != sequence);
        before.saturating_sub(events.len())
    }

    /// Store a forged copy of the event at `sequence` under a new id and
    /// return that id.
    pub fn duplicate(&self, log: &LogId, sequence: u64) -> Option<EventId> {
        let mut forged = self.event_at(log, sequence)?;
        forged.id = EventId::new();
        forged.metadata.insert("forged".into(), "true".into());
        let id = forged.id;
        self.insert(log, forged);
        Some(id)
    }

    /// Fail the next `calls` accessor calls with
    /// [`AccessorError::Unavailable`].
    pub fn fail_next(&self, calls: u32) {
        self.lock().outage = calls;
    }

    /// Outage calls not yet consumed.
    #[must_use]
    pub fn remaining_outage(&self) -> u32 {
        self.lock().outage
    }

    /// Reads served so far.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    /// Hash writes applied so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }
}

#[async_trait]
impl EventAccessor for FaultyAccessor {
    async fn get_event(&self, log: &LogId, id: &EventId) -> AccessorResult<AuditEvent> {
        let mut guard = self.lock();
        guard.check_outage()?;
        guard.reads = guard.reads.saturating_add(1);
        guard.find(log, id).map(|e| e.clone())
    }

    async fn get_events_by_sequence_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
    ) -> AccessorResult<Vec<AuditEvent>> {
        let mut guard = self.lock();
        guard.check_outage()?;
        guard.reads = guard.reads.saturating_add(1);
        Ok(guard
            .events(log)
            .iter()
            .filter(|e| (start..=end).contains(&e.sequence))
            .cloned()
            .collect())
    }

    async fn get_latest_sequence(&self, log: &LogId) -> AccessorResult<Option<u64>> {
        let mut guard = self.lock();
        guard.check_outage()?;
        guard.reads = guard.reads.saturating_add(1);
        Ok(guard.events(log).last().map(|e| e.sequence))
    }

    async fn update_event_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()> {
        let mut guard = self.lock();
        guard.check_outage()?;
        guard.find(log, id)?.content_hash = new_hash;
        guard.writes = guard.writes.saturating_add(1);
        Ok(())
    }

    async fn update_previous_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()> {
        let mut guard = self.lock();
        guard.check_outage()?;
        guard.find(log, id)?.previous_hash = new_hash;
        guard.writes = guard.writes.saturating_add(1);
        Ok(())
    }
}
