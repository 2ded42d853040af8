//! Event accessor contract and a key-value backed implementation.
//!
//! The event store is an external collaborator. The engine reads through
//! [`EventAccessor`] and writes only the two hash fields, and only during
//! repair.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use veritrail_crypto::ContentHash;
use veritrail_storage::{KvStore, StorageError};

use crate::event::{AuditEvent, EventId, LogId};

/// Errors returned by an [`EventAccessor`].
#[derive(Debug, Clone, Error)]
pub enum AccessorError {
    /// The requested sequence or id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The event exists but cannot be decoded.
    #[error("malformed event {subject}: {reason}")]
    Malformed {
        /// Sequence or id of the event.
        subject: String,
        /// Decoding failure.
        reason: String,
    },

    /// The store could not be reached.
    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

impl From<StorageError> for AccessorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Result type for accessor calls.
pub type AccessorResult<T> = Result<T, AccessorError>;

/// A stored entry whose sequence is known but whose body does not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEvent {
    /// Sequence the entry is stored under.
    pub sequence: u64,
    /// Storage key of the entry.
    pub key: String,
    /// Decoding failure.
    pub reason: String,
}

/// Everything stored in a sequence range, decodable or not.
#[derive(Debug, Clone, Default)]
pub struct StoredRange {
    /// Decoded events, ordered by sequence.
    pub events: Vec<AuditEvent>,
    /// Entries that exist but could not be decoded.
    pub malformed: Vec<MalformedEvent>,
}

/// Read access to one or more sequence-numbered audit logs.
#[async_trait]
pub trait EventAccessor: Send + Sync {
    /// Fetch an event by id.
    async fn get_event(&self, log: &LogId, id: &EventId) -> AccessorResult<AuditEvent>;

    /// Fetch every stored event with `start <= sequence <= end`, ordered by
    /// sequence. Events sharing a sequence are all returned. Absent
    /// sequences are simply not in the result.
    async fn get_events_by_sequence_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
    ) -> AccessorResult<Vec<AuditEvent>>;

    /// Like [`get_events_by_sequence_range`](Self::get_events_by_sequence_range)
    /// but also reports entries that exist and cannot be decoded, so callers
    /// can tell corruption apart from absence. The default reports none.
    async fn read_sequence_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
    ) -> AccessorResult<StoredRange> {
        Ok(StoredRange {
            events: self.get_events_by_sequence_range(log, start, end).await?,
            malformed: Vec::new(),
        })
    }

    /// Highest stored sequence, or `None` for an empty log.
    async fn get_latest_sequence(&self, log: &LogId) -> AccessorResult<Option<u64>>;

    /// Overwrite an event's stored content hash.
    async fn update_event_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()>;

    /// Overwrite an event's stored previous hash.
    async fn update_previous_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()>;

    /// Fetch the first stored event at `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessorError::NotFound`] when the sequence is absent.
    async fn get_event_by_sequence(&self, log: &LogId, sequence: u64) -> AccessorResult<AuditEvent> {
        self.get_events_by_sequence_range(log, sequence, sequence)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AccessorError::NotFound(format!("{log} sequence {sequence}")))
    }
}

// ---------------------------------------------------------------------------
// Key-value backed accessor
// ---------------------------------------------------------------------------

/// Namespace holding a log's events.
#[must_use]
pub fn events_namespace(log: &LogId) -> String {
    format!("veritrail:events:{log}")
}

fn index_namespace(log: &LogId) -> String {
    format!("veritrail:event-index:{log}")
}

/// `{sequence:020}:{id}` so byte order is sequence order and duplicates at
/// one sequence sit next to each other.
pub(crate) fn event_key(sequence: u64, id: &EventId) -> String {
    format!("{sequence:020}:{id}")
}

fn sequence_bound(sequence: u64) -> String {
    format!("{sequence:020}")
}

fn sequence_of_key(key: &str) -> Option<u64> {
    key.split(':').next()?.parse().ok()
}

/// [`EventAccessor`] over any [`KvStore`].
///
/// Events are stored as JSON under `veritrail:events:{log}` with a
/// secondary id index under `veritrail:event-index:{log}`. Entries that fail
/// to decode are reported by [`EventAccessor::read_sequence_range`] as
/// [`MalformedEvent`]s and left out of plain range reads.
#[derive(Clone)]
pub struct KvEventAccessor {
    store: Arc<dyn KvStore>,
}

impl KvEventAccessor {
    /// Create an accessor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store an event as given, without touching its hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn insert(&self, log: &LogId, event: &AuditEvent) -> AccessorResult<()> {
        let key = event_key(event.sequence, &event.id);
        let bytes = serde_json::to_vec(event).map_err(|e| AccessorError::Malformed {
            subject: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.set(&events_namespace(log), &key, bytes).await?;
        self.store
            .set(&index_namespace(log), &event.id.to_string(), key.into_bytes())
            .await?;
        Ok(())
    }

    /// Remove an event entirely.
    ///
    /// # Errors
    ///
    /// Returns [`AccessorError::NotFound`] if the id is unknown.
    pub async fn remove(&self, log: &LogId, id: &EventId) -> AccessorResult<()> {
        let key = self.primary_key(log, id).await?;
        self.store.delete(&events_namespace(log), &key).await?;
        self.store
            .delete(&index_namespace(log), &id.to_string())
            .await?;
        Ok(())
    }

    async fn primary_key(&self, log: &LogId, id: &EventId) -> AccessorResult<String> {
        let raw = self
            .store
            .get(&index_namespace(log), &id.to_string())
            .await?
            .ok_or_else(|| AccessorError::NotFound(format!("{log} event {id}")))?;
        String::from_utf8(raw).map_err(|e| AccessorError::Malformed {
            subject: id.to_string(),
            reason: format!("corrupt index entry: {e}"),
        })
    }

    async fn rewrite(
        &self,
        log: &LogId,
        id: &EventId,
        apply: impl FnOnce(&mut AuditEvent) + Send,
    ) -> AccessorResult<()> {
        let mut event = self.get_event(log, id).await?;
        apply(&mut event);
        self.insert(log, &event).await
    }
}

impl std::fmt::Debug for KvEventAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEventAccessor").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventAccessor for KvEventAccessor {
    async fn get_event(&self, log: &LogId, id: &EventId) -> AccessorResult<AuditEvent> {
        let key = self.primary_key(log, id).await?;
        let raw = self
            .store
            .get(&events_namespace(log), &key)
            .await?
            .ok_or_else(|| AccessorError::NotFound(format!("{log} event {id}")))?;
        serde_json::from_slice(&raw).map_err(|e| AccessorError::Malformed {
            subject: key,
            reason: e.to_string(),
        })
    }

    async fn get_events_by_sequence_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
    ) -> AccessorResult<Vec<AuditEvent>> {
        Ok(self.read_sequence_range(log, start, end).await?.events)
    }

    async fn read_sequence_range(
        &self,
        log: &LogId,
        start: u64,
        end: u64,
    ) -> AccessorResult<StoredRange> {
        if start > end {
            return Ok(StoredRange::default());
        }
        let upper = end.checked_add(1).map(sequence_bound);
        let entries = self
            .store
            .range(&events_namespace(log), &sequence_bound(start), upper.as_deref())
            .await?;

        let mut range = StoredRange {
            events: Vec::with_capacity(entries.len()),
            malformed: Vec::new(),
        };
        for entry in entries {
            match serde_json::from_slice::<AuditEvent>(&entry.value) {
                Ok(event) => range.events.push(event),
                Err(e) => {
                    let Some(sequence) = sequence_of_key(&entry.key) else {
                        warn!(log_id = %log, key = %entry.key, "Ignoring entry with unparseable key");
                        continue;
                    };
                    warn!(
                        log_id = %log,
                        key = %entry.key,
                        sequence,
                        error = %e,
                        "Undecodable event"
                    );
                    range.malformed.push(MalformedEvent {
                        sequence,
                        key: entry.key,
                        reason: e.to_string(),
                    });
                },
            }
        }
        debug!(
            log_id = %log,
            start,
            end,
            fetched = range.events.len(),
            malformed = range.malformed.len(),
            "Read event range"
        );
        Ok(range)
    }

    async fn get_latest_sequence(&self, log: &LogId) -> AccessorResult<Option<u64>> {
        let keys = self.store.list_keys(&events_namespace(log)).await?;
        Ok(keys.last().and_then(|k| sequence_of_key(k)))
    }

    async fn update_event_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()> {
        self.rewrite(log, id, move |e| e.content_hash = new_hash).await
    }

    async fn update_previous_hash(
        &self,
        log: &LogId,
        id: &EventId,
        new_hash: ContentHash,
    ) -> AccessorResult<()> {
        self.rewrite(log, id, move |e| e.previous_hash = new_hash).await
    }
}
