//! Test fixtures for common types.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing_subscriber::EnvFilter;
use veritrail_integrity::{Actor, ActorType, AuditEvent, LogId, Target, TargetType};
use veritrail_storage::{KvStore, MemoryKvStore};
use veritrail_telemetry::RequestContext;

/// Create the default test log ID.
#[must_use]
pub fn test_log_id() -> LogId {
    test_log_id_named("test-log")
}

/// Create a test log ID with a specific name.
///
/// # Panics
///
/// Panics if `name` is not a valid log id.
#[must_use]
pub fn test_log_id_named(name: &str) -> LogId {
    LogId::new(name).expect("test log id must be valid")
}

/// Create a request context for an operator-initiated test operation.
#[must_use]
pub fn test_context() -> RequestContext {
    RequestContext::new("test").with_initiator("test-operator")
}

/// Fixed instant the fixture timestamps count from.
#[must_use]
pub fn test_base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Timestamp of the fixture event at `sequence`: one second per sequence
/// after [`test_base_time`].
#[must_use]
pub fn test_timestamp(sequence: u64) -> DateTime<Utc> {
    let secs = i64::try_from(sequence).unwrap_or(i64::MAX);
    test_base_time()
        .checked_add_signed(Duration::seconds(secs))
        .unwrap_or_else(test_base_time)
}

/// Create an unsealed event at `sequence`.
#[must_use]
pub fn test_event(sequence: u64) -> AuditEvent {
    AuditEvent::new(
        sequence,
        Actor::new("svc-billing", ActorType::Service),
        "payment.capture",
    )
    .with_target(Target::new(format!("payment-{sequence}"), TargetType::Payment))
    .with_timestamp(test_timestamp(sequence))
}

/// A fresh in-memory key-value store.
#[must_use]
pub fn test_store() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::new())
}

/// Install a test-writer tracing subscriber with the given filter.
///
/// Safe to call from every test; only the first call installs.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with the default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}
