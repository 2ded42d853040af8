//! Repair soundness, signed repair records and repair serialization.

#![allow(clippy::arithmetic_side_effects)]

mod common;

use common::{EngineHarness, build_engine};
use veritrail_config::IntegrityConfig;
use veritrail_crypto::{ContentHash, KeyPair};
use veritrail_integrity::{
    BreakType, OperationKind, OperationOutcome, RepairActionKind, RepairPolicy,
};

#[tokio::test]
async fn test_hash_mismatch_is_repaired() {
    let h = EngineHarness::with_chain(10);
    let original = h.accessor.event_at(&h.log, 4).unwrap().content_hash;
    h.accessor.set_stored_hash(&h.log, 4, ContentHash::hash(b"corrupted"));

    let result = h
        .engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 10, &h.opts())
        .await
        .unwrap();
    assert!(result.success);
    assert!(!result.pre_repair.is_valid);
    assert!(result.post_repair.is_valid);
    assert_eq!(result.applied(), 1);
    assert_eq!(result.actions[0].kind, RepairActionKind::RecalculateHash);
    assert_eq!(h.accessor.event_at(&h.log, 4).unwrap().content_hash, original);

    let after = h.engine.verify(&h.ctx, &h.log, 1, 10, &h.opts()).await.unwrap();
    assert!(after.is_valid);
}

#[tokio::test]
async fn test_field_tamper_repair_relinks_successors() {
    let h = EngineHarness::with_chain(6);
    h.accessor.tamper(&h.log, 3, |e| {
        e.metadata.insert("note".into(), "edited".into());
    });

    let result = h
        .engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 6, &h.opts())
        .await
        .unwrap();
    assert!(result.success);
    // One new hash at 3, then a relink and a new hash for each successor.
    assert_eq!(result.applied(), 7);
    let relinks = result
        .actions
        .iter()
        .filter(|a| a.kind == RepairActionKind::RebuildLink)
        .count();
    assert_eq!(relinks, 3);
    assert!(h.engine.verify(&h.ctx, &h.log, 1, 6, &h.opts()).await.unwrap().is_valid);
}

#[tokio::test]
async fn test_missing_event_is_unrepairable() {
    let h = EngineHarness::with_chain(10);
    h.accessor.delete(&h.log, 5);

    let result = h
        .engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 10, &h.opts())
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.unrepairable.len(), 1);
    let issue = &result.unrepairable[0];
    assert_eq!(issue.break_type, BreakType::MissingEvent);
    assert_eq!((issue.start_sequence, issue.end_sequence), (5, 5));
    assert!(issue.requires_manual_action);
    assert!(!result.post_repair.is_valid);
    assert_eq!(h.accessor.writes(), 0);
}

#[tokio::test]
async fn test_repairs_are_signed_and_journaled() {
    let h = EngineHarness::with_chain(8);
    h.accessor.set_stored_hash(&h.log, 2, ContentHash::hash(b"a"));
    h.accessor.set_stored_hash(&h.log, 7, ContentHash::hash(b"b"));

    let result = h
        .engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 8, &h.opts())
        .await
        .unwrap();
    assert_eq!(result.policy, RepairPolicy::RecordSuperseded);

    let records = h.engine.repair_records(&h.ctx, &h.log).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].superseded_hash, ContentHash::hash(b"a"));
    assert_eq!(records[1].sequence, 7);
    assert_eq!(records[0].initiator.as_deref(), Some("test-operator"));
    assert!(result.actions.iter().all(|a| a.record_position.is_some()));

    let check = h.engine.verify_repair_records(&h.ctx, &h.log).await.unwrap();
    assert!(check.valid);
    assert_eq!(check.records_verified, 2);

    let journal = h.engine.journal_records(&h.ctx, &h.log).await.unwrap();
    let repair = journal
        .iter()
        .find(|r| r.kind == OperationKind::RepairHashChain)
        .unwrap();
    assert_eq!(repair.outcome, OperationOutcome::Succeeded);
    assert_eq!(repair.request_id, h.ctx.request_id);
    assert!(h.engine.verify_journal(&h.ctx, &h.log).await.unwrap().valid);
}

#[tokio::test]
async fn test_in_place_policy_writes_no_records() {
    let mut config = IntegrityConfig::default();
    config.repair.policy = "in_place".into();
    let h = EngineHarness::with_config(5, config);
    h.accessor.set_stored_hash(&h.log, 5, ContentHash::hash(b"z"));

    let result = h
        .engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 5, &h.opts())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.policy, RepairPolicy::InPlace);
    assert!(h.engine.repair_records(&h.ctx, &h.log).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rotated_keys_still_verify_old_records() {
    let h = EngineHarness::with_chain(6);
    h.accessor.set_stored_hash(&h.log, 2, ContentHash::hash(b"one"));
    h.engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 6, &h.opts())
        .await
        .unwrap();

    let _retired = h.engine.rotate_signing_key(&h.ctx, KeyPair::generate()).await;
    h.accessor.set_stored_hash(&h.log, 5, ContentHash::hash(b"two"));
    h.engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 6, &h.opts())
        .await
        .unwrap();

    let records = h.engine.repair_records(&h.ctx, &h.log).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].signer_key_id, records[1].signer_key_id);
    assert!(h.engine.verify_repair_records(&h.ctx, &h.log).await.unwrap().valid);
}

#[tokio::test]
async fn test_signing_key_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = IntegrityConfig::default();
    config.repair.key_path = Some(dir.path().join("repair.key"));
    let h = EngineHarness::with_config(4, config.clone());
    h.accessor.set_stored_hash(&h.log, 3, ContentHash::hash(b"k"));
    h.engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 4, &h.opts())
        .await
        .unwrap();

    let restarted = build_engine(&h.accessor, &h.store, config);
    let check = restarted.verify_repair_records(&h.ctx, &h.log).await.unwrap();
    assert!(check.valid);
    assert_eq!(check.records_verified, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_repairs_are_serialized() {
    let h = EngineHarness::with_chain(50);
    h.accessor.set_stored_hash(&h.log, 20, ContentHash::hash(b"race"));

    let opts = h.opts();
    let (a, b) = tokio::join!(
        h.engine.repair_hash_chain(&h.ctx, &h.log, 1, 50, &opts),
        h.engine.repair_hash_chain(&h.ctx, &h.log, 10, 30, &opts),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Whichever ran second found nothing left to do.
    assert_eq!(a.applied() + b.applied(), 1);
    assert!(a.success && b.success);
    assert_eq!(h.engine.repair_records(&h.ctx, &h.log).await.unwrap().len(), 1);
    assert!(h.engine.verify(&h.ctx, &h.log, 1, 50, &h.opts()).await.unwrap().is_valid);
}

#[tokio::test]
async fn test_repair_refreshes_chain_head() {
    let h = EngineHarness::with_chain(5);
    h.accessor.set_stored_hash(&h.log, 5, ContentHash::hash(b"tail"));
    h.engine.verify(&h.ctx, &h.log, 1, 5, &h.opts()).await.unwrap();
    let before = h.engine.get_chain_head(&h.ctx, &h.log).await.unwrap().unwrap();
    assert!(!before.healthy);

    h.engine
        .repair_hash_chain(&h.ctx, &h.log, 1, 5, &h.opts())
        .await
        .unwrap();
    let after = h.engine.get_chain_head(&h.ctx, &h.log).await.unwrap().unwrap();
    assert_eq!(after.sequence, 5);
    assert!(after.healthy);
    assert_eq!(after.hash, h.accessor.event_at(&h.log, 5).unwrap().content_hash);
}
