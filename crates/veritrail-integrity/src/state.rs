//! Persisted state owned by the engine.
//!
//! | Namespace | Key | Value |
//! |-----------|-----|-------|
//! | `veritrail:heads` | log id | [`ChainHead`] |
//! | `veritrail:checkpoints` | log id | [`MonitorCheckpoints`] |
//! | `veritrail:monitoring` | log id | [`MonitorRecord`] |
//! | `veritrail:alerts:{log}` | alert id / open key | alerts |
//! | `veritrail:journal:{log}` | position | operation records |
//! | `veritrail:repairs:{log}` | position | repair records |
//!
//! Append-only ledgers get one namespace per log so range reads stay
//! within a single log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veritrail_crypto::ContentHash;
use veritrail_storage::{KvStore, ScopedKvStore};

use crate::error::IntegrityResult;
use crate::event::{ChainLink, EventId, LogId};
use crate::monitor::{MonitorState, MonitoringConfig};
use crate::verifier::VerificationResult;

const HEADS_NS: &str = "veritrail:heads";
const CHECKPOINTS_NS: &str = "veritrail:checkpoints";
const MONITORING_NS: &str = "veritrail:monitoring";

/// The latest verified position of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Log this head belongs to.
    pub log_id: LogId,
    /// Latest verified sequence.
    pub sequence: u64,
    /// Event at that sequence.
    pub event_id: EventId,
    /// Its stored hash.
    pub hash: ContentHash,
    /// Its stored previous hash.
    pub previous_hash: ContentHash,
    /// Running hash the verifier carried through this sequence. Equal to
    /// `hash` on a healthy chain; resuming verification seeds from it.
    pub running_hash: ContentHash,
    /// No breaks were found up to this sequence.
    pub healthy: bool,
    /// When the head was last written.
    pub last_checked: DateTime<Utc>,
}

impl ChainHead {
    /// Build a head from the last verified event.
    #[must_use]
    pub fn from_link(log_id: LogId, link: ChainLink, running_hash: ContentHash, healthy: bool) -> Self {
        Self {
            log_id,
            sequence: link.sequence,
            event_id: link.event_id,
            hash: link.hash,
            previous_hash: link.previous_hash,
            running_hash,
            healthy,
            last_checked: Utc::now(),
        }
    }
}

/// Last sequence each monitor check has completed through. `0` means the
/// check has not covered anything yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorCheckpoints {
    /// Incremental chain verification.
    pub verification: u64,
    /// Gap / duplicate / order audit.
    pub sequence: u64,
    /// Sampled corruption scan.
    pub corruption: u64,
    /// Last write.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persisted monitoring configuration and last known state of a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    /// Log monitored.
    pub log_id: LogId,
    /// Active configuration.
    pub config: MonitoringConfig,
    /// Outcome of the last completed tick.
    pub state: MonitorState,
    /// Who configured monitoring.
    pub configured_by: Option<String>,
    /// When monitoring was configured.
    pub configured_at: DateTime<Utc>,
}

/// Typed access to engine state over a [`KvStore`].
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KvStore>,
    heads: ScopedKvStore,
    checkpoints: ScopedKvStore,
    monitoring: ScopedKvStore,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Create a state store.
    ///
    /// # Errors
    ///
    /// Returns an error if a namespace is rejected by the store.
    pub fn new(store: Arc<dyn KvStore>) -> IntegrityResult<Self> {
        Ok(Self {
            heads: ScopedKvStore::new(Arc::clone(&store), HEADS_NS)?,
            checkpoints: ScopedKvStore::new(Arc::clone(&store), CHECKPOINTS_NS)?,
            monitoring: ScopedKvStore::new(Arc::clone(&store), MONITORING_NS)?,
            store,
        })
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// A per-log namespace, e.g. `veritrail:journal:{log}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is rejected by the store.
    pub fn scoped(&self, prefix: &str, log: &LogId) -> IntegrityResult<ScopedKvStore> {
        Ok(ScopedKvStore::new(
            Arc::clone(&self.store),
            format!("{prefix}:{log}"),
        )?)
    }

    // -- Chain heads --

    /// The persisted head of `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record cannot be decoded.
    pub async fn chain_head(&self, log: &LogId) -> IntegrityResult<Option<ChainHead>> {
        Ok(self.heads.get_json(log.as_str()).await?)
    }

    /// Replace the head of its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn put_chain_head(&self, head: &ChainHead) -> IntegrityResult<()> {
        Ok(self.heads.set_json(head.log_id.as_str(), head).await?)
    }

    /// Move the head of `log` to the tail of `result`.
    ///
    /// The head never moves backwards. Health is sticky: once a break has
    /// been seen the head stays unhealthy until a verification that covered
    /// the chain from genesis (`from_genesis`) comes back valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn advance_head(
        &self,
        log: &LogId,
        result: &VerificationResult,
        from_genesis: bool,
    ) -> IntegrityResult<Option<ChainHead>> {
        let current = self.chain_head(log).await?;
        let Some(tail) = result.tail else {
            return Ok(current);
        };
        if current.as_ref().is_some_and(|h| tail.sequence < h.sequence) {
            return Ok(current);
        }
        let healthy = result.is_valid
            && (from_genesis || current.as_ref().is_none_or(|h| h.healthy));
        let head = ChainHead::from_link(log.clone(), tail, result.final_hash, healthy);
        self.put_chain_head(&head).await?;
        Ok(Some(head))
    }

    // -- Checkpoints --

    /// Monitor checkpoints of `log`, all zero if none were written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record cannot be decoded.
    pub async fn checkpoints(&self, log: &LogId) -> IntegrityResult<MonitorCheckpoints> {
        Ok(self
            .checkpoints
            .get_json(log.as_str())
            .await?
            .unwrap_or_default())
    }

    /// Persist monitor checkpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn put_checkpoints(&self, log: &LogId, checkpoints: &MonitorCheckpoints) -> IntegrityResult<()> {
        let mut checkpoints = checkpoints.clone();
        checkpoints.updated_at = Some(Utc::now());
        Ok(self.checkpoints.set_json(log.as_str(), &checkpoints).await?)
    }

    // -- Monitoring --

    /// Persisted monitoring record of `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record cannot be decoded.
    pub async fn monitor_record(&self, log: &LogId) -> IntegrityResult<Option<MonitorRecord>> {
        Ok(self.monitoring.get_json(log.as_str()).await?)
    }

    /// Persist a monitoring record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn put_monitor_record(&self, record: &MonitorRecord) -> IntegrityResult<()> {
        Ok(self
            .monitoring
            .set_json(record.log_id.as_str(), record)
            .await?)
    }

    /// Update only the state of an existing monitoring record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn set_monitor_state(&self, log: &LogId, state: MonitorState) -> IntegrityResult<()> {
        if let Some(mut record) = self.monitor_record(log).await? {
            record.state = state;
            self.put_monitor_record(&record).await?;
        }
        Ok(())
    }

    /// Forget the monitoring record of `log`. Checkpoints are kept so a
    /// later setup resumes where monitoring stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete_monitor_record(&self, log: &LogId) -> IntegrityResult<bool> {
        Ok(self.monitoring.delete(log.as_str()).await?)
    }

    /// Logs with a persisted monitoring record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn monitored_logs(&self) -> IntegrityResult<Vec<LogId>> {
        Ok(self
            .monitoring
            .list_keys()
            .await?
            .into_iter()
            .filter_map(|k| LogId::new(k).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritrail_storage::MemoryKvStore;

    fn state() -> StateStore {
        StateStore::new(Arc::new(MemoryKvStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_chain_head_per_log() {
        let state = state();
        let a = LogId::new("a").unwrap();
        let b = LogId::new("b").unwrap();
        let link = ChainLink {
            sequence: 7,
            event_id: EventId::new(),
            hash: ContentHash::hash(b"7"),
            previous_hash: ContentHash::hash(b"6"),
        };
        state
            .put_chain_head(&ChainHead::from_link(a.clone(), link, link.hash, true))
            .await
            .unwrap();

        let head = state.chain_head(&a).await.unwrap().unwrap();
        assert_eq!(head.sequence, 7);
        assert!(head.healthy);
        assert!(state.chain_head(&b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advance_head_is_monotonic_and_sticky() {
        use crate::options::CheckOptions;
        use crate::testing::{TestLog, log_id};
        use crate::verifier::{ChainVerifier, VerifierSettings};

        let log = TestLog::with_chain(10).await;
        let state = StateStore::new(Arc::clone(&log.store)).unwrap();
        let verifier = ChainVerifier::new(log.accessor(), VerifierSettings::default());
        let opts = CheckOptions::new();

        log.set_stored_hash(3, ContentHash::hash(b"x")).await;
        let broken = verifier.verify(&log_id(), 1, 6, &opts).await.unwrap();
        let head = state.advance_head(&log_id(), &broken, true).await.unwrap().unwrap();
        assert_eq!(head.sequence, 6);
        assert!(!head.healthy);

        // A valid later range does not clear the flag.
        let later = verifier.verify(&log_id(), 7, 10, &opts).await.unwrap();
        assert!(later.is_valid);
        let head = state.advance_head(&log_id(), &later, false).await.unwrap().unwrap();
        assert_eq!(head.sequence, 10);
        assert!(!head.healthy);

        // An earlier tail never moves the head back.
        let early = verifier.verify(&log_id(), 1, 2, &opts).await.unwrap();
        let head = state.advance_head(&log_id(), &early, true).await.unwrap().unwrap();
        assert_eq!(head.sequence, 10);
    }

    #[tokio::test]
    async fn test_checkpoints_default_to_zero() {
        let state = state();
        let log = LogId::new("a").unwrap();
        assert_eq!(state.checkpoints(&log).await.unwrap().verification, 0);

        let cp = MonitorCheckpoints {
            verification: 40,
            sequence: 30,
            corruption: 20,
            updated_at: None,
        };
        state.put_checkpoints(&log, &cp).await.unwrap();
        let stored = state.checkpoints(&log).await.unwrap();
        assert_eq!((stored.verification, stored.sequence, stored.corruption), (40, 30, 20));
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_monitor_records() {
        let state = state();
        let log = LogId::new("a").unwrap();
        state
            .put_monitor_record(&MonitorRecord {
                log_id: log.clone(),
                config: MonitoringConfig::default(),
                state: MonitorState::Idle,
                configured_by: Some("ops".into()),
                configured_at: Utc::now(),
            })
            .await
            .unwrap();
        state
            .set_monitor_state(&log, MonitorState::AlertRaised)
            .await
            .unwrap();

        let record = state.monitor_record(&log).await.unwrap().unwrap();
        assert_eq!(record.state, MonitorState::AlertRaised);
        assert_eq!(state.monitored_logs().await.unwrap(), vec![log.clone()]);

        assert!(state.delete_monitor_record(&log).await.unwrap());
        assert!(state.monitored_logs().await.unwrap().is_empty());
    }
}
