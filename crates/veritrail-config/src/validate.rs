//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::IntegrityConfig;

/// Repair policies understood by the engine.
pub const REPAIR_POLICIES: &[&str] = &["record_superseded", "in_place"];

/// Alert channels understood by the engine.
pub const ALERT_CHANNELS: &[&str] = &["log", "broadcast"];

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &IntegrityConfig) -> ConfigResult<()> {
    validate_verification(config)?;
    validate_scanner(config)?;
    validate_repair(config)?;
    validate_monitoring(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn unit_interval(field: &str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(
            field,
            format!("{value} is out of range; must be between 0.0 and 1.0"),
        ));
    }
    Ok(())
}

fn validate_verification(config: &IntegrityConfig) -> ConfigResult<()> {
    let v = &config.verification;
    if v.batch_size == 0 {
        return Err(invalid("verification.batch_size", "must be at least 1"));
    }
    if v.partition_size == 0 {
        return Err(invalid("verification.partition_size", "must be at least 1"));
    }
    if v.max_parallel_partitions == 0 {
        return Err(invalid(
            "verification.max_parallel_partitions",
            "must be at least 1",
        ));
    }
    Ok(())
}

fn validate_scanner(config: &IntegrityConfig) -> ConfigResult<()> {
    let s = &config.scanner;
    if s.max_field_len == 0 {
        return Err(invalid("scanner.max_field_len", "must be at least 1"));
    }
    if s.burst_threshold < 2 {
        return Err(invalid(
            "scanner.burst_threshold",
            "a burst needs at least 2 identical hashes",
        ));
    }
    unit_interval("scanner.divergence_threshold", s.divergence_threshold)?;
    if s.max_findings == 0 {
        return Err(invalid("scanner.max_findings", "must be at least 1"));
    }
    Ok(())
}

fn validate_repair(config: &IntegrityConfig) -> ConfigResult<()> {
    if !REPAIR_POLICIES.contains(&config.repair.policy.as_str()) {
        return Err(invalid(
            "repair.policy",
            format!(
                "unsupported policy '{}'; expected one of: {}",
                config.repair.policy,
                REPAIR_POLICIES.join(", ")
            ),
        ));
    }
    Ok(())
}

fn validate_monitoring(config: &IntegrityConfig) -> ConfigResult<()> {
    let m = &config.monitoring;
    for (field, secs) in [
        ("monitoring.verification_interval_secs", m.verification_interval_secs),
        ("monitoring.sequence_interval_secs", m.sequence_interval_secs),
        ("monitoring.corruption_interval_secs", m.corruption_interval_secs),
    ] {
        if secs == 0 {
            return Err(invalid(field, "interval must be at least 1 second"));
        }
    }

    unit_interval("monitoring.sample_rate", m.sample_rate)?;
    if m.sample_rate <= 0.0 {
        return Err(invalid("monitoring.sample_rate", "must be greater than 0.0"));
    }
    if m.max_range_per_tick == 0 {
        return Err(invalid("monitoring.max_range_per_tick", "must be at least 1"));
    }

    for channel in &m.channels {
        if !ALERT_CHANNELS.contains(&channel.as_str()) {
            return Err(invalid(
                "monitoring.channels",
                format!(
                    "unsupported channel '{channel}'; expected one of: {}",
                    ALERT_CHANNELS.join(", ")
                ),
            ));
        }
    }

    unit_interval(
        "monitoring.thresholds.hash_failure_rate",
        m.thresholds.hash_failure_rate,
    )?;
    unit_interval(
        "monitoring.thresholds.corruption_ratio",
        m.thresholds.corruption_ratio,
    )?;

    if m.retry.max_attempts == 0 {
        return Err(invalid("monitoring.retry.max_attempts", "must be at least 1"));
    }
    if m.retry.initial_backoff_ms > m.retry.max_backoff_ms {
        return Err(invalid(
            "monitoring.retry.initial_backoff_ms",
            format!(
                "initial_backoff_ms ({}) must not exceed max_backoff_ms ({})",
                m.retry.initial_backoff_ms, m.retry.max_backoff_ms
            ),
        ));
    }
    Ok(())
}

fn validate_logging(config: &IntegrityConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&IntegrityConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = IntegrityConfig::default();
        config.verification.batch_size = 0;
        assert_eq!(field_of(validate(&config)), "verification.batch_size");
    }

    #[test]
    fn test_unknown_repair_policy_rejected() {
        let mut config = IntegrityConfig::default();
        config.repair.policy = "yolo".into();
        assert_eq!(field_of(validate(&config)), "repair.policy");
    }

    #[test]
    fn test_sample_rate_bounds() {
        let mut config = IntegrityConfig::default();
        config.monitoring.sample_rate = 0.0;
        assert_eq!(field_of(validate(&config)), "monitoring.sample_rate");
        config.monitoring.sample_rate = 1.5;
        assert_eq!(field_of(validate(&config)), "monitoring.sample_rate");
        config.monitoring.sample_rate = 1.0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let mut config = IntegrityConfig::default();
        config.monitoring.channels.push("pager".into());
        assert_eq!(field_of(validate(&config)), "monitoring.channels");
    }

    #[test]
    fn test_backoff_ordering() {
        let mut config = IntegrityConfig::default();
        config.monitoring.retry.initial_backoff_ms = 60_000;
        assert_eq!(
            field_of(validate(&config)),
            "monitoring.retry.initial_backoff_ms"
        );
    }

    #[test]
    fn test_burst_threshold_minimum() {
        let mut config = IntegrityConfig::default();
        config.scanner.burst_threshold = 1;
        assert_eq!(field_of(validate(&config)), "scanner.burst_threshold");
    }

    #[test]
    fn test_logging_values() {
        let mut config = IntegrityConfig::default();
        config.logging.level = "loud".into();
        assert_eq!(field_of(validate(&config)), "logging.level");
        config.logging.level = "debug".into();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }
}
