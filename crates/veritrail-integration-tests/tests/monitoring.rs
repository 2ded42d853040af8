//! Background monitoring: retries, alerting, acknowledgement and resume
//! after restart.

#![allow(clippy::arithmetic_side_effects)]

mod common;

use common::{EngineHarness, quiet_monitoring, wait_for_status};
use veritrail_crypto::ContentHash;
use veritrail_integrity::{AlertCheck, IntegrityError, MonitorState, OperationKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_retries_through_outage() {
    let h = EngineHarness::with_chain(20);
    h.accessor.fail_next(2);

    h.engine
        .setup_integrity_monitoring(&h.ctx, &h.log, quiet_monitoring())
        .await
        .unwrap();
    let status = wait_for_status(&h.engine, &h.log, |s| s.ticks >= 3).await;

    assert_eq!(h.accessor.remaining_outage(), 0);
    assert_eq!(status.last_outcome, Some(MonitorState::Healthy));
    assert_eq!(status.checkpoints.verification, 20);
    assert_eq!(status.checkpoints.sequence, 20);
    assert!(h.engine.get_alerts(&h.ctx, &h.log, true).await.unwrap().is_empty());

    let head = h.engine.get_chain_head(&h.ctx, &h.log).await.unwrap().unwrap();
    assert_eq!(head.sequence, 20);
    assert!(head.healthy);
    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exhausted_retries_degrade_without_advancing() {
    let h = EngineHarness::with_chain(10);
    let mut config = quiet_monitoring();
    config.retry.max_attempts = 2;
    h.accessor.fail_next(2);

    h.engine
        .setup_integrity_monitoring(&h.ctx, &h.log, config)
        .await
        .unwrap();
    let status = wait_for_status(&h.engine, &h.log, |s| s.ticks >= 3).await;

    // The verification tick gave up; the later checks ran after the outage.
    assert!(status.last_error.is_some());
    assert_eq!(status.checkpoints.verification, 0);
    assert_eq!(status.checkpoints.sequence, 10);
    assert!(h.engine.get_chain_head(&h.ctx, &h.log).await.unwrap().is_none());

    assert!(h.engine.notify_new_events(&h.log).await);
    let status = wait_for_status(&h.engine, &h.log, |s| s.checkpoints.verification == 10).await;
    assert_eq!(status.last_outcome, Some(MonitorState::Healthy));
    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alert_lifecycle_is_journaled() {
    let h = EngineHarness::with_chain(10);
    h.accessor.set_stored_hash(&h.log, 5, ContentHash::hash(b"tampered"));
    let mut alerts_rx = h.engine.subscribe_alerts();

    let mut config = quiet_monitoring();
    config.channels = vec!["log".into(), "broadcast".into()];
    h.engine
        .setup_integrity_monitoring(&h.ctx, &h.log, config)
        .await
        .unwrap();
    let status = wait_for_status(&h.engine, &h.log, |s| s.ticks >= 3).await;
    assert_eq!(status.last_outcome, Some(MonitorState::AlertRaised));

    let broadcast = alerts_rx.recv().await.unwrap();
    assert_eq!(broadcast.log_id, h.log);

    let open = h.engine.get_alerts(&h.ctx, &h.log, false).await.unwrap();
    let verification = open
        .iter()
        .find(|a| a.key.check == AlertCheck::Verification)
        .unwrap();
    assert_eq!((verification.key.start, verification.key.end), (1, 10));

    // A wake-up with nothing new leaves the open alerts as they are.
    let ticks = status.ticks;
    h.engine.notify_new_events(&h.log).await;
    wait_for_status(&h.engine, &h.log, |s| s.ticks > ticks).await;
    let again = h.engine.get_alerts(&h.ctx, &h.log, false).await.unwrap();
    assert_eq!(again.len(), open.len());

    for alert in &again {
        h.engine
            .acknowledge_alert(&h.ctx, &h.log, alert.id, "oncall", Some("investigating".into()))
            .await
            .unwrap();
    }
    let err = h
        .engine
        .acknowledge_alert(&h.ctx, &h.log, again[0].id, "oncall", None)
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrityError::Validation(_)));

    let ticks = h.engine.monitor_status(&h.log).await.unwrap().ticks;
    assert!(h.engine.notify_new_events(&h.log).await);
    let status = wait_for_status(&h.engine, &h.log, |s| s.ticks > ticks).await;
    assert_ne!(status.last_outcome, Some(MonitorState::AlertRaised));

    let journal = h.engine.journal_records(&h.ctx, &h.log).await.unwrap();
    let kinds: Vec<OperationKind> = journal.iter().map(|r| r.kind).collect();
    assert_eq!(kinds[0], OperationKind::SetupMonitoring);
    assert!(kinds.contains(&OperationKind::AcknowledgeAlert));
    assert!(kinds.contains(&OperationKind::MonitorTransition));
    assert!(h.engine.verify_journal(&h.ctx, &h.log).await.unwrap().valid);
    assert!(h.engine.get_alerts(&h.ctx, &h.log, false).await.unwrap().is_empty());
    assert_eq!(h.engine.get_alerts(&h.ctx, &h.log, true).await.unwrap().len(), again.len());
    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitoring_resumes_from_checkpoints_after_restart() {
    let h = EngineHarness::with_chain(15);
    h.engine
        .setup_integrity_monitoring(&h.ctx, &h.log, quiet_monitoring())
        .await
        .unwrap();
    wait_for_status(&h.engine, &h.log, |s| s.ticks >= 3).await;
    h.engine.shutdown().await;

    h.append(10);
    let restarted = h.restart();
    let resumed = restarted.resume_monitoring(&h.ctx).await.unwrap();
    assert_eq!(resumed, vec![h.log.clone()]);

    let status = wait_for_status(&restarted, &h.log, |s| s.ticks >= 3).await;
    assert_eq!(status.checkpoints.verification, 25);
    assert_eq!(status.last_outcome, Some(MonitorState::Healthy));
    let head = restarted.get_chain_head(&h.ctx, &h.log).await.unwrap().unwrap();
    assert_eq!(head.sequence, 25);
    assert!(head.healthy);

    let stopped = restarted.stop_monitoring(&h.ctx, &h.log).await.unwrap().unwrap();
    assert!(!stopped.running);
    assert!(restarted.monitor_status(&h.log).await.is_none());
    assert!(restarted.resume_monitoring(&h.ctx).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_channel_is_rejected_and_journaled() {
    let h = EngineHarness::with_chain(3);
    let mut config = quiet_monitoring();
    config.channels = vec!["pager".into()];

    let err = h
        .engine
        .setup_integrity_monitoring(&h.ctx, &h.log, config)
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrityError::Validation(_)));
    assert!(h.engine.monitor_status(&h.log).await.is_none());

    let journal = h.engine.journal_records(&h.ctx, &h.log).await.unwrap();
    assert_eq!(journal.len(), 1);
    assert!(matches!(
        journal[0].outcome,
        veritrail_integrity::OperationOutcome::Failed(_)
    ));
}
