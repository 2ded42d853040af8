//! The audit event model and identifiers.
//!
//! Events are owned by the external event store; the engine only reads them
//! and, during repair, rewrites the two hash fields.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veritrail_crypto::ContentHash;

use crate::error::{IntegrityError, IntegrityResult};
use crate::vocab::{ActorType, DataClass, EventResult, LegalBasis, TargetType};

/// Longest accepted log identifier, in bytes.
pub const MAX_LOG_ID_LEN: usize = 128;

/// Identifier of one independently chained audit log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogId(String);

impl LogId {
    /// Validate and wrap a log identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for empty or over-long ids and
    /// for ids containing control characters.
    pub fn new(id: impl Into<String>) -> IntegrityResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(IntegrityError::Validation("log id must not be empty".into()));
        }
        if id.len() > MAX_LOG_ID_LEN {
            return Err(IntegrityError::Validation(format!(
                "log id exceeds {MAX_LOG_ID_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(IntegrityError::Validation(
                "log id must not contain control characters".into(),
            ));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LogId {
    type Error = IntegrityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LogId> for String {
    fn from(id: LogId) -> Self {
        id.0
    }
}

/// Unique identifier of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who performed the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Principal identifier.
    pub id: String,
    /// Principal kind.
    pub kind: ActorType,
}

impl Actor {
    /// Create an actor.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ActorType) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// What the action was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Resource identifier.
    pub id: String,
    /// Resource kind.
    pub kind: TargetType,
}

impl Target {
    /// Create a target.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TargetType) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// One record of the append-only audit log.
///
/// `actor` and `action` are optional at the type level because stored
/// events can lose them; the hash chain computer rejects events without
/// them as structurally invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: EventId,
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// When the audited action happened.
    pub timestamp: DateTime<Utc>,
    /// Who acted.
    #[serde(default)]
    pub actor: Option<Actor>,
    /// What was acted upon.
    #[serde(default)]
    pub target: Option<Target>,
    /// Action name (`payment.refund`, `session.create`, ...).
    #[serde(default)]
    pub action: Option<String>,
    /// Outcome.
    #[serde(default)]
    pub result: EventResult,
    /// Classification of the affected data.
    #[serde(default)]
    pub data_class: Option<DataClass>,
    /// Lawful basis for processing.
    #[serde(default)]
    pub legal_basis: Option<LegalBasis>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Stored hash of this event.
    #[serde(default)]
    pub content_hash: ContentHash,
    /// Stored hash of the preceding event.
    #[serde(default)]
    pub previous_hash: ContentHash,
}

impl AuditEvent {
    /// Create an unsealed event. Both hash fields start as zero; use
    /// [`crate::chain::seal`] to link it to its predecessor.
    #[must_use]
    pub fn new(sequence: u64, actor: Actor, action: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            timestamp: Utc::now(),
            actor: Some(actor),
            target: None,
            action: Some(action.into()),
            result: EventResult::Success,
            data_class: None,
            legal_basis: None,
            metadata: BTreeMap::new(),
            content_hash: ContentHash::zero(),
            previous_hash: ContentHash::zero(),
        }
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn with_result(mut self, result: EventResult) -> Self {
        self.result = result;
        self
    }

    /// Set the data classification.
    #[must_use]
    pub fn with_data_class(mut self, class: DataClass) -> Self {
        self.data_class = Some(class);
        self
    }

    /// Set the legal basis.
    #[must_use]
    pub fn with_legal_basis(mut self, basis: LegalBasis) -> Self {
        self.legal_basis = Some(basis);
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Action name, or `""` when absent.
    #[must_use]
    pub fn action_name(&self) -> &str {
        self.action.as_deref().unwrap_or_default()
    }
}

/// A present position in a chain: enough to seed or resume a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Sequence of the event.
    pub sequence: u64,
    /// Event id.
    pub event_id: EventId,
    /// Stored content hash.
    pub hash: ContentHash,
    /// Stored previous hash.
    pub previous_hash: ContentHash,
}

impl From<&AuditEvent> for ChainLink {
    fn from(event: &AuditEvent) -> Self {
        Self {
            sequence: event.sequence,
            event_id: event.id,
            hash: event.content_hash,
            previous_hash: event.previous_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_id_validation() {
        assert!(LogId::new("payments").is_ok());
        assert!(LogId::new("").is_err());
        assert!(LogId::new("a\nb").is_err());
        assert!(LogId::new("x".repeat(MAX_LOG_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_log_id_serde_validates() {
        let id: LogId = serde_json::from_str("\"payments\"").unwrap();
        assert_eq!(id.as_str(), "payments");
        assert!(serde_json::from_str::<LogId>("\"\"").is_err());
    }

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(3, Actor::new("alice", ActorType::User), "payment.refund")
            .with_target(Target::new("pay-1", TargetType::Payment))
            .with_data_class(DataClass::Financial)
            .with_metadata("amount", "12.50");

        assert_eq!(event.sequence, 3);
        assert_eq!(event.action_name(), "payment.refund");
        assert!(event.content_hash.is_zero());
        assert_eq!(event.metadata.len(), 1);
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = format!(
            r#"{{"id":"{}","sequence":1,"timestamp":"2026-01-01T00:00:00Z"}}"#,
            Uuid::new_v4()
        );
        let event: AuditEvent = serde_json::from_str(&json).unwrap();
        assert!(event.actor.is_none());
        assert!(event.action.is_none());
        assert_eq!(event.result, EventResult::Unknown);
        assert!(event.content_hash.is_zero());
    }
}
