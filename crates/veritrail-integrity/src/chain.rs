//! Hash chain computer.
//!
//! `hash(n) = H(canonical(event_n) || hash(n-1))`, with [`GENESIS_HASH`]
//! standing in for `hash(0)`. The canonical form is a fixed sequence of
//! tagged, length-prefixed fields fed to a domain-separated BLAKE3 hasher,
//! so the result depends only on field values.

use veritrail_crypto::{CanonicalHasher, ContentHash};

use crate::error::{IntegrityError, IntegrityResult};
use crate::event::AuditEvent;

pub use veritrail_crypto::GENESIS_HASH;

/// Domain-separation context for event hashes.
pub const EVENT_HASH_DOMAIN: &str = "veritrail 2026 audit-event v1";

/// Check the fields the chain cannot be computed without.
///
/// # Errors
///
/// Returns [`IntegrityError::Structural`] when the sequence is zero or the
/// actor or action is missing or empty.
pub fn validate_linkage(event: &AuditEvent) -> IntegrityResult<()> {
    let subject = || format!("event {} (sequence {})", event.id, event.sequence);
    if event.sequence == 0 {
        return Err(IntegrityError::structural(subject(), "sequence must be at least 1"));
    }
    match &event.actor {
        None => return Err(IntegrityError::structural(subject(), "missing actor")),
        Some(actor) if actor.id.trim().is_empty() => {
            return Err(IntegrityError::structural(subject(), "empty actor id"));
        },
        Some(_) => {},
    }
    match event.action.as_deref() {
        None => Err(IntegrityError::structural(subject(), "missing action")),
        Some(action) if action.trim().is_empty() => {
            Err(IntegrityError::structural(subject(), "empty action"))
        },
        Some(_) => Ok(()),
    }
}

/// Compute the canonical hash of `event` chained onto `previous`.
///
/// The stored `content_hash` and `previous_hash` fields are not inputs;
/// `previous` is supplied by the caller.
///
/// # Errors
///
/// Returns [`IntegrityError::Structural`] if [`validate_linkage`] fails.
pub fn compute_hash(event: &AuditEvent, previous: &ContentHash) -> IntegrityResult<ContentHash> {
    validate_linkage(event)?;

    let mut hasher = CanonicalHasher::new(EVENT_HASH_DOMAIN);
    hasher
        .bytes("id", event.id.as_uuid().as_bytes())
        .u64("sequence", event.sequence)
        .i64("timestamp_secs", event.timestamp.timestamp())
        .u64(
            "timestamp_nanos",
            u64::from(event.timestamp.timestamp_subsec_nanos()),
        );

    if let Some(actor) = &event.actor {
        hasher.str("actor_id", &actor.id).str("actor_type", actor.kind.as_str());
    }
    hasher
        .opt_str("target_id", event.target.as_ref().map(|t| t.id.as_str()))
        .opt_str("target_type", event.target.as_ref().map(|t| t.kind.as_str()))
        .str("action", event.action_name())
        .str("result", event.result.as_str())
        .opt_str("data_class", event.data_class.map(|c| c.as_str()))
        .opt_str("legal_basis", event.legal_basis.map(|b| b.as_str()));

    let entries = u64::try_from(event.metadata.len()).unwrap_or(u64::MAX);
    hasher.u64("metadata_len", entries);
    for (key, value) in &event.metadata {
        hasher.str("metadata_key", key).str("metadata_value", value);
    }

    hasher.hash("previous", previous);
    Ok(hasher.finalize())
}

/// Link `event` to `previous`: set both hash fields and return the new
/// content hash.
///
/// # Errors
///
/// Returns [`IntegrityError::Structural`] if the event cannot be hashed.
pub fn seal(event: &mut AuditEvent, previous: ContentHash) -> IntegrityResult<ContentHash> {
    let hash = compute_hash(event, &previous)?;
    event.previous_hash = previous;
    event.content_hash = hash;
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Actor, Target};
    use crate::vocab::{ActorType, DataClass, TargetType};
    use chrono::TimeZone;

    fn event() -> AuditEvent {
        AuditEvent::new(1, Actor::new("alice", ActorType::User), "bid.place")
            .with_target(Target::new("bid-9", TargetType::Bid))
            .with_timestamp(chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
            .with_metadata("amount", "100")
            .with_metadata("currency", "EUR")
    }

    #[test]
    fn test_hash_is_deterministic() {
        let e = event();
        let a = compute_hash(&e, &GENESIS_HASH).unwrap();
        let b = compute_hash(&e.clone(), &GENESIS_HASH).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stored_hash_fields_are_not_inputs() {
        let mut e = event();
        let before = compute_hash(&e, &GENESIS_HASH).unwrap();
        e.content_hash = ContentHash::hash(b"anything");
        e.previous_hash = ContentHash::hash(b"else");
        assert_eq!(compute_hash(&e, &GENESIS_HASH).unwrap(), before);
    }

    #[test]
    fn test_every_field_changes_the_hash() {
        let base = compute_hash(&event(), &GENESIS_HASH).unwrap();

        let mut e = event();
        e.sequence = 2;
        assert_ne!(compute_hash(&e, &GENESIS_HASH).unwrap(), base);

        let mut e = event();
        e.timestamp += chrono::Duration::nanoseconds(1);
        assert_ne!(compute_hash(&e, &GENESIS_HASH).unwrap(), base);

        let mut e = event();
        e.data_class = Some(DataClass::Financial);
        assert_ne!(compute_hash(&e, &GENESIS_HASH).unwrap(), base);

        let mut e = event();
        e.metadata.insert("amount".into(), "101".into());
        assert_ne!(compute_hash(&e, &GENESIS_HASH).unwrap(), base);

        assert_ne!(
            compute_hash(&event(), &ContentHash::hash(b"prev")).unwrap(),
            base
        );
    }

    #[test]
    fn test_absent_target_differs_from_empty_target() {
        let mut absent = event();
        absent.target = None;
        let mut empty = event();
        empty.target = Some(Target::new("", TargetType::Bid));
        assert_ne!(
            compute_hash(&absent, &GENESIS_HASH).unwrap(),
            compute_hash(&empty, &GENESIS_HASH).unwrap()
        );
    }

    #[test]
    fn test_missing_linkage_fields_are_structural_errors() {
        let mut e = event();
        e.actor = None;
        assert!(matches!(
            compute_hash(&e, &GENESIS_HASH),
            Err(IntegrityError::Structural { .. })
        ));

        let mut e = event();
        e.action = Some("  ".into());
        assert!(matches!(
            compute_hash(&e, &GENESIS_HASH),
            Err(IntegrityError::Structural { .. })
        ));

        let mut e = event();
        e.sequence = 0;
        assert!(compute_hash(&e, &GENESIS_HASH).is_err());
    }

    #[test]
    fn test_seal_sets_both_fields() {
        let mut e = event();
        let prev = ContentHash::hash(b"prev");
        let hash = seal(&mut e, prev).unwrap();
        assert_eq!(e.content_hash, hash);
        assert_eq!(e.previous_hash, prev);
        assert_eq!(compute_hash(&e, &prev).unwrap(), hash);
    }
}
