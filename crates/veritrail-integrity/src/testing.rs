//! In-crate fixtures for unit tests.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use veritrail_crypto::ContentHash;
use veritrail_storage::{KvStore, MemoryKvStore};

use crate::accessor::{EventAccessor, KvEventAccessor, event_key, events_namespace};
use crate::chain::{GENESIS_HASH, seal};
use crate::event::{Actor, AuditEvent, LogId};
use crate::vocab::ActorType;

pub(crate) fn log_id() -> LogId {
    LogId::new("test-log").unwrap()
}

pub(crate) fn event_at(sequence: u64) -> AuditEvent {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    AuditEvent::new(sequence, Actor::new("svc-billing", ActorType::Service), "payment.capture")
        .with_timestamp(base + Duration::seconds(i64::try_from(sequence).unwrap()))
}

/// A correctly chained log in a memory store, with tampering helpers.
pub(crate) struct TestLog {
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) accessor: Arc<KvEventAccessor>,
}

impl TestLog {
    pub(crate) async fn with_chain(len: u64) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let accessor = Arc::new(KvEventAccessor::new(Arc::clone(&store)));
        let log = Self { store, accessor };
        log.append_events(1, len).await;
        log
    }

    pub(crate) async fn append_events(&self, from: u64, to: u64) {
        let mut previous = if from <= 1 {
            GENESIS_HASH
        } else {
            self.get(from - 1).await.content_hash
        };
        for seq in from..=to {
            let mut event = event_at(seq);
            previous = seal(&mut event, previous).unwrap();
            self.accessor.insert(&log_id(), &event).await.unwrap();
        }
    }

    pub(crate) fn accessor(&self) -> Arc<dyn EventAccessor> {
        Arc::clone(&self.accessor) as Arc<dyn EventAccessor>
    }

    pub(crate) async fn get(&self, sequence: u64) -> AuditEvent {
        self.accessor
            .get_event_by_sequence(&log_id(), sequence)
            .await
            .unwrap()
    }

    pub(crate) async fn mutate(&self, sequence: u64, f: impl FnOnce(&mut AuditEvent)) {
        let mut event = self.get(sequence).await;
        f(&mut event);
        self.accessor.insert(&log_id(), &event).await.unwrap();
    }

    pub(crate) async fn set_stored_hash(&self, sequence: u64, hash: ContentHash) {
        self.mutate(sequence, |e| e.content_hash = hash).await;
    }

    pub(crate) async fn delete(&self, sequence: u64) {
        let event = self.get(sequence).await;
        self.accessor.remove(&log_id(), &event.id).await.unwrap();
    }

    /// Overwrite the stored bytes of `sequence` with something that is not
    /// an event.
    pub(crate) async fn garble(&self, sequence: u64) {
        let event = self.get(sequence).await;
        self.store
            .set(
                &events_namespace(&log_id()),
                &event_key(sequence, &event.id),
                b"{not json".to_vec(),
            )
            .await
            .unwrap();
    }

    pub(crate) async fn insert_forged_duplicate(&self, sequence: u64) {
        let mut forged = event_at(sequence).with_metadata("forged", "yes");
        forged.content_hash = ContentHash::hash(b"forged");
        forged.previous_hash = ContentHash::hash(b"forged-prev");
        self.accessor.insert(&log_id(), &forged).await.unwrap();
    }
}
