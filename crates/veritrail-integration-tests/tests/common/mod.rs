//! Shared test harness for integration tests.

use std::sync::Arc;
use std::time::Duration;

use veritrail_config::IntegrityConfig;
use veritrail_integrity::{
    CheckOptions, EventAccessor, IntegrityEngine, LogId, MonitorStatus, MonitoringConfig,
};
use veritrail_storage::KvStore;
use veritrail_telemetry::RequestContext;
use veritrail_test::{
    ChainBuilder, FaultyAccessor, setup_test_logging_default, test_context, test_log_id,
    test_store,
};

/// An engine over a fault-injecting accessor and an in-memory state store.
#[allow(dead_code)]
pub struct EngineHarness {
    /// The engine under test.
    pub engine: IntegrityEngine,
    /// Event store shared with the engine.
    pub accessor: FaultyAccessor,
    /// State store shared with the engine.
    pub store: Arc<dyn KvStore>,
    /// The log every helper targets.
    pub log: LogId,
    /// Operator context.
    pub ctx: RequestContext,
}

#[allow(dead_code)]
impl EngineHarness {
    /// A harness whose log holds a correct chain of `len` events.
    pub fn with_chain(len: u64) -> Self {
        Self::with_config(len, IntegrityConfig::default())
    }

    /// A harness with an explicit engine configuration.
    pub fn with_config(len: u64, config: IntegrityConfig) -> Self {
        setup_test_logging_default();
        let log = test_log_id();
        let accessor = FaultyAccessor::with_events(&log, ChainBuilder::new(len).build());
        let store = test_store();
        let engine = build_engine(&accessor, &store, config);
        Self {
            engine,
            accessor,
            store,
            log,
            ctx: test_context(),
        }
    }

    /// A second engine over the same event and state stores, as after a
    /// process restart.
    pub fn restart(&self) -> IntegrityEngine {
        build_engine(&self.accessor, &self.store, IntegrityConfig::default())
    }

    /// The engine's default check options.
    pub fn opts(&self) -> CheckOptions {
        self.engine.check_options()
    }

    /// Append `count` correctly linked events after the current tail.
    pub fn append(&self, count: u64) {
        let events = self.accessor.events(&self.log);
        let next = events.last().map_or(1, |e| e.sequence + 1);
        let chain = ChainBuilder::new(count)
            .starting_at(next)
            .after(ChainBuilder::tail_hash(&events))
            .build();
        self.accessor.insert_all(&self.log, chain);
    }
}

/// Build an engine over the given stores.
pub fn build_engine(
    accessor: &FaultyAccessor,
    store: &Arc<dyn KvStore>,
    config: IntegrityConfig,
) -> IntegrityEngine {
    let accessor: Arc<dyn EventAccessor> = Arc::new(accessor.clone());
    IntegrityEngine::builder(accessor, Arc::clone(store))
        .config(config)
        .build()
        .expect("engine must build")
}

/// Monitoring with hour-long intervals, so only the three start-up ticks
/// and explicit wake-ups run, full sampling and fast retries.
#[allow(dead_code)]
pub fn quiet_monitoring() -> MonitoringConfig {
    let mut config = MonitoringConfig::default();
    config.verification_interval_ms = 3_600_000;
    config.sequence_interval_ms = 3_600_000;
    config.corruption_interval_ms = 3_600_000;
    config.sample_rate = 1.0;
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 20;
    config
}

/// Wait until the monitor of `log` reports a status matching `done`.
#[allow(dead_code)]
pub async fn wait_for_status(
    engine: &IntegrityEngine,
    log: &LogId,
    done: impl Fn(&MonitorStatus) -> bool,
) -> MonitorStatus {
    let mut rx = engine
        .watch_monitor(log)
        .await
        .expect("monitor must be running");
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| done(s)))
        .await
        .expect("monitor did not reach the expected status in time")
        .expect("monitor status channel closed");
    status.clone()
}
