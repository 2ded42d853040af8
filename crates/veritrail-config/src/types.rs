//! Configuration types for the integrity engine.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header still yields a working
//! configuration. The engine converts these into its own types at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Chain verification paging and parallelism.
    pub verification: VerificationSection,
    /// Sequence auditor tolerances.
    pub sequence: SequenceSection,
    /// Corruption scanner bounds and statistical thresholds.
    pub scanner: ScannerSection,
    /// Repair policy.
    pub repair: RepairSection,
    /// Background monitor schedule, thresholds and alert channels.
    pub monitoring: MonitoringSection,
    /// Logging level, format and output.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[verification]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    /// Events fetched from the accessor per page.
    pub batch_size: u64,
    /// Sequences per sub-range in partitioned verification.
    pub partition_size: u64,
    /// Sub-ranges verified concurrently.
    pub max_parallel_partitions: usize,
    /// Default per-operation deadline in seconds; `0` means none.
    pub deadline_secs: u64,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            batch_size: 500,
            partition_size: 10_000,
            max_parallel_partitions: 4,
            deadline_secs: 0,
        }
    }
}

/// `[sequence]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSection {
    /// Timestamp regressions up to this many milliseconds are tolerated.
    pub clock_skew_ms: u64,
}

impl Default for SequenceSection {
    fn default() -> Self {
        Self {
            clock_skew_ms: 5_000,
        }
    }
}

/// `[scanner]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    /// Maximum length of identifier and action fields, in bytes.
    pub max_field_len: usize,
    /// Maximum length of a single metadata value, in bytes.
    pub max_metadata_value_len: usize,
    /// Consecutive events sharing one content hash that count as a burst.
    pub burst_threshold: usize,
    /// Total-variation distance between action distributions that counts
    /// as divergence from the trailing baseline.
    pub divergence_threshold: f64,
    /// Size of the trailing baseline window, in events.
    pub baseline_window: u64,
    /// Findings after which a scan stops and reports `truncated`.
    pub max_findings: usize,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            max_field_len: 1024,
            max_metadata_value_len: 8192,
            burst_threshold: 3,
            divergence_threshold: 0.5,
            baseline_window: 1000,
            max_findings: 10_000,
        }
    }
}

/// `[repair]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSection {
    /// `record_superseded` (signed repair ledger) or `in_place`.
    pub policy: String,
    /// Ed25519 signing key for repair records. Generated on first use.
    pub key_path: Option<PathBuf>,
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            policy: "record_superseded".to_owned(),
            key_path: None,
        }
    }
}

/// `[monitoring]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    /// Whether monitors are started automatically.
    pub enabled: bool,
    /// Seconds between incremental chain verifications.
    pub verification_interval_secs: u64,
    /// Seconds between gap/duplicate/order audits.
    pub sequence_interval_secs: u64,
    /// Seconds between sampled corruption scans.
    pub corruption_interval_secs: u64,
    /// Fraction of events examined by the sampled corruption scan.
    pub sample_rate: f64,
    /// Upper bound on sequences covered by one check in one tick.
    pub max_range_per_tick: u64,
    /// Enabled alert channels: `log`, `broadcast`.
    pub channels: Vec<String>,
    /// Alert thresholds.
    pub thresholds: ThresholdsSection,
    /// Retry behaviour for operational failures inside a tick.
    pub retry: RetrySection,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: false,
            verification_interval_secs: 60,
            sequence_interval_secs: 300,
            corruption_interval_secs: 900,
            sample_rate: 0.1,
            max_range_per_tick: 50_000,
            channels: vec!["log".to_owned()],
            thresholds: ThresholdsSection::default(),
            retry: RetrySection::default(),
        }
    }
}

/// `[monitoring.thresholds]`. A check breaches when its measured value is
/// strictly greater than the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsSection {
    /// Invalid or missing hashes divided by sequences covered.
    pub hash_failure_rate: f64,
    /// Number of sequence gaps.
    pub gap_count: u64,
    /// Corrupted events divided by events scanned.
    pub corruption_ratio: f64,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            hash_failure_rate: 0.0,
            gap_count: 0,
            corruption_ratio: 0.01,
        }
    }
}

/// `[monitoring.retry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per check per tick, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level: `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Write rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
    /// Extra `EnvFilter` directives.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directory: None,
            directives: Vec::new(),
        }
    }
}
