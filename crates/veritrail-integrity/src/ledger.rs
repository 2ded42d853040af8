//! Hash-linked, append-only record ledgers.
//!
//! The operation journal and the repair ledger both store one record per
//! position (`{position:020}`) in a per-log namespace, each record carrying
//! the hash of its predecessor.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use veritrail_crypto::ContentHash;
use veritrail_storage::ScopedKvStore;

use crate::chain::GENESIS_HASH;
use crate::error::IntegrityResult;

/// A record that can live in a ledger.
pub(crate) trait Linked: Serialize + DeserializeOwned + Send + Sync {
    /// 1-based position in the ledger.
    fn position(&self) -> u64;
    /// Stored hash of the preceding record.
    fn previous_hash(&self) -> ContentHash;
    /// Stored hash of this record.
    fn record_hash(&self) -> ContentHash;
    /// Hash recomputed from the record's content.
    fn compute_hash(&self) -> ContentHash;
}

/// Problem found while verifying a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerIssue {
    /// Positions are not contiguous.
    PositionGap {
        /// Position that should have come next.
        expected: u64,
        /// Position found.
        actual: u64,
    },
    /// A record's content does not match its stored hash.
    HashMismatch {
        /// Position of the record.
        position: u64,
    },
    /// A record does not link to its predecessor.
    BrokenLink {
        /// Position of the record.
        position: u64,
        /// Hash of the preceding record.
        expected_previous: ContentHash,
        /// Previous hash stored on the record.
        actual_previous: ContentHash,
    },
    /// A record's signature does not verify.
    InvalidSignature {
        /// Position of the record.
        position: u64,
        /// Verification failure.
        reason: String,
    },
}

impl fmt::Display for LedgerIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PositionGap { expected, actual } => {
                write!(f, "position gap: expected {expected}, found {actual}")
            },
            Self::HashMismatch { position } => {
                write!(f, "record {position}: content does not match its hash")
            },
            Self::BrokenLink {
                position,
                expected_previous,
                actual_previous,
            } => write!(
                f,
                "record {position}: broken link (expected {}, got {})",
                expected_previous.short_hex(),
                actual_previous.short_hex()
            ),
            Self::InvalidSignature { position, reason } => {
                write!(f, "record {position}: invalid signature: {reason}")
            },
        }
    }
}

/// Result of verifying a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    /// No issues were found.
    pub valid: bool,
    /// Records examined.
    pub records_verified: u64,
    /// Issues in position order.
    pub issues: Vec<LedgerIssue>,
}

impl LedgerVerification {
    pub(crate) fn from_issues(records_verified: u64, issues: Vec<LedgerIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            records_verified,
            issues,
        }
    }
}

pub(crate) fn position_key(position: u64) -> String {
    format!("{position:020}")
}

/// Every record, in position order.
pub(crate) async fn read_all<T: Linked>(ns: &ScopedKvStore) -> IntegrityResult<Vec<T>> {
    Ok(ns
        .scan_json::<T>("0")
        .await?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// The last record, if any.
pub(crate) async fn tail<T: Linked>(ns: &ScopedKvStore) -> IntegrityResult<Option<T>> {
    let Some(last) = ns.list_keys().await?.pop() else {
        return Ok(None);
    };
    Ok(ns.get_json(&last).await?)
}

/// Position and previous hash for the next record.
pub(crate) async fn next_slot<T: Linked>(ns: &ScopedKvStore) -> IntegrityResult<(u64, ContentHash)> {
    Ok(match tail::<T>(ns).await? {
        Some(last) => (last.position().saturating_add(1), last.record_hash()),
        None => (1, GENESIS_HASH),
    })
}

pub(crate) async fn append<T: Linked>(ns: &ScopedKvStore, record: &T) -> IntegrityResult<()> {
    Ok(ns.set_json(&position_key(record.position()), record).await?)
}

/// Check positions, content hashes and links.
pub(crate) fn verify_links<T: Linked>(records: &[T]) -> Vec<LedgerIssue> {
    let mut issues = Vec::new();
    let mut expected_position: u64 = 1;
    let mut previous = GENESIS_HASH;

    for record in records {
        if record.position() != expected_position {
            issues.push(LedgerIssue::PositionGap {
                expected: expected_position,
                actual: record.position(),
            });
        }
        if record.compute_hash() != record.record_hash() {
            warn!(position = record.position(), "Ledger record hash mismatch");
            issues.push(LedgerIssue::HashMismatch {
                position: record.position(),
            });
        }
        if record.previous_hash() != previous {
            warn!(position = record.position(), "Ledger link broken");
            issues.push(LedgerIssue::BrokenLink {
                position: record.position(),
                expected_previous: previous,
                actual_previous: record.previous_hash(),
            });
        }
        expected_position = record.position().saturating_add(1);
        previous = record.record_hash();
    }
    issues
}
