//! Config file discovery and layered loading.
//!
//! 1. Parse embedded `defaults.toml`
//! 2. Merge the explicit file, or `$VERITRAIL_HOME/config.toml`, or
//!    `~/.veritrail/config.toml`
//! 3. Apply `VERITRAIL_*` environment overrides
//! 4. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::IntegrityConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Environment variable naming the config directory.
pub const HOME_ENV_VAR: &str = "VERITRAIL_HOME";

/// Kind of TOML value an environment override is coerced into.
#[derive(Clone, Copy)]
enum EnvKind {
    Str,
    Int,
    Float,
    Bool,
}

/// Supported overrides: variable, dotted field path, value kind.
const ENV_OVERRIDES: &[(&str, &str, EnvKind)] = &[
    ("VERITRAIL_LOG_LEVEL", "logging.level", EnvKind::Str),
    ("VERITRAIL_LOG_FORMAT", "logging.format", EnvKind::Str),
    ("VERITRAIL_LOG_DIR", "logging.directory", EnvKind::Str),
    ("VERITRAIL_BATCH_SIZE", "verification.batch_size", EnvKind::Int),
    ("VERITRAIL_DEADLINE_SECS", "verification.deadline_secs", EnvKind::Int),
    ("VERITRAIL_CLOCK_SKEW_MS", "sequence.clock_skew_ms", EnvKind::Int),
    ("VERITRAIL_REPAIR_POLICY", "repair.policy", EnvKind::Str),
    ("VERITRAIL_REPAIR_KEY_PATH", "repair.key_path", EnvKind::Str),
    ("VERITRAIL_MONITORING_ENABLED", "monitoring.enabled", EnvKind::Bool),
    ("VERITRAIL_SAMPLE_RATE", "monitoring.sample_rate", EnvKind::Float),
    (
        "VERITRAIL_MAX_RANGE_PER_TICK",
        "monitoring.max_range_per_tick",
        EnvKind::Int,
    ),
];

/// A loaded configuration plus where its values came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The validated configuration.
    pub config: IntegrityConfig,
    /// Files merged over the defaults, in order.
    pub loaded_files: Vec<PathBuf>,
    /// Environment variables that were applied.
    pub env_overrides: Vec<String>,
}

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, an
/// override cannot be coerced, or the result fails validation.
pub fn load(explicit: Option<&Path>) -> ConfigResult<LoadedConfig> {
    let env: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("VERITRAIL_"))
        .collect();
    load_with_env(explicit, &env)
}

/// Load configuration with an explicit environment map.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    explicit: Option<&Path>,
    env: &HashMap<String, String, S>,
) -> ConfigResult<LoadedConfig> {
    let mut merged = parse_toml(DEFAULTS_TOML, "<embedded defaults>")?;
    let mut loaded_files = Vec::new();

    let file = match explicit {
        // An explicitly requested file must exist.
        Some(path) => Some((read_file(path)?, path.to_path_buf())),
        None => match user_config_path(env) {
            Some(path) => try_read_file(&path)?.map(|content| (content, path)),
            None => None,
        },
    };

    if let Some((content, path)) = file {
        let overlay = parse_toml(&content, &path.display().to_string())?;
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded config file");
        loaded_files.push(path);
    }

    let env_overrides = apply_env_overrides(&mut merged, env)?;
    if !env_overrides.is_empty() {
        debug!(count = env_overrides.len(), "applied environment overrides");
    }

    let config: IntegrityConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;

    Ok(LoadedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

/// Load a single file over the defaults, without environment overrides.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or the
/// result fails validation.
pub fn load_file(path: &Path) -> ConfigResult<IntegrityConfig> {
    let empty: HashMap<String, String> = HashMap::new();
    load_with_env(Some(path), &empty).map(|loaded| loaded.config)
}

fn user_config_path<S: ::std::hash::BuildHasher>(
    env: &HashMap<String, String, S>,
) -> Option<PathBuf> {
    if let Some(home) = env.get(HOME_ENV_VAR) {
        return Some(PathBuf::from(home).join("config.toml"));
    }
    let Some(dirs) = directories::BaseDirs::new() else {
        debug!("no home directory; skipping user config");
        return None;
    };
    Some(dirs.home_dir().join(".veritrail").join("config.toml"))
}

fn parse_toml(content: &str, path: &str) -> ConfigResult<toml::Value> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.to_owned(),
        source: e,
    })
}

fn read_file(path: &Path) -> ConfigResult<String> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    check_size(path, &content)?;
    Ok(content)
}

/// Read a file, returning `None` if it does not exist.
fn try_read_file(path: &Path) -> ConfigResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            check_size(path, &content)?;
            Ok(Some(content))
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            Ok(None)
        },
        Err(e) => Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn check_size(path: &Path, content: &str) -> ConfigResult<()> {
    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }
    Ok(())
}

/// Recursively merge `overlay` into `base`. Tables merge key by key; any
/// other value in the overlay replaces the base value.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env: &HashMap<String, String, S>,
) -> ConfigResult<Vec<String>> {
    let mut applied = Vec::new();
    for &(var_name, field_path, kind) in ENV_OVERRIDES {
        let Some(raw) = env.get(var_name) else {
            continue;
        };
        let value = coerce(var_name, raw, kind)?;
        set_field(merged, field_path, value);
        debug!(var = var_name, field = field_path, "applying env override");
        applied.push(var_name.to_owned());
    }
    Ok(applied)
}

fn coerce(var_name: &str, raw: &str, kind: EnvKind) -> ConfigResult<toml::Value> {
    let err = |message: String| ConfigError::EnvError {
        var_name: var_name.to_owned(),
        message,
    };
    Ok(match kind {
        EnvKind::Str => toml::Value::String(raw.to_owned()),
        EnvKind::Int => toml::Value::Integer(
            raw.trim()
                .parse::<i64>()
                .map_err(|e| err(format!("expected an integer: {e}")))?,
        ),
        EnvKind::Float => toml::Value::Float(
            raw.trim()
                .parse::<f64>()
                .map_err(|e| err(format!("expected a number: {e}")))?,
        ),
        EnvKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => toml::Value::Boolean(true),
            "0" | "false" | "no" | "off" => toml::Value::Boolean(false),
            other => return Err(err(format!("expected a boolean, got '{other}'"))),
        },
    })
}

/// Set a dotted field path in the tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_home_env() -> HashMap<String, String> {
        let dir = std::env::temp_dir().join("veritrail-config-test-nonexistent");
        HashMap::from([(HOME_ENV_VAR.to_owned(), dir.display().to_string())])
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: IntegrityConfig = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, IntegrityConfig::default());
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let loaded = load_with_env(None, &no_home_env()).unwrap();
        assert!(loaded.loaded_files.is_empty());
        assert!(loaded.env_overrides.is_empty());
        assert_eq!(loaded.config.repair.policy, "record_superseded");
    }

    #[test]
    fn test_file_layer_merges_partially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[monitoring]\nenabled = true\n[monitoring.thresholds]\ngap_count = 5\n",
        )
        .unwrap();

        let config = load_file(&path).unwrap();
        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.thresholds.gap_count, 5);
        // Untouched siblings keep their defaults.
        assert!((config.monitoring.thresholds.corruption_ratio - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.monitoring.verification_interval_secs, 60);
    }

    #[test]
    fn test_home_directory_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[sequence]\nclock_skew_ms = 10\n")
            .unwrap();
        let env = HashMap::from([(HOME_ENV_VAR.to_owned(), dir.path().display().to_string())]);

        let loaded = load_with_env(None, &env).unwrap();
        assert_eq!(loaded.config.sequence.clock_skew_ms, 10);
        assert_eq!(loaded.loaded_files.len(), 1);
    }

    #[test]
    fn test_env_overrides_beat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

        let mut env = no_home_env();
        env.insert("VERITRAIL_LOG_LEVEL".into(), "debug".into());
        env.insert("VERITRAIL_MONITORING_ENABLED".into(), "yes".into());
        env.insert("VERITRAIL_SAMPLE_RATE".into(), "0.25".into());

        let loaded = load_with_env(Some(&path), &env).unwrap();
        assert_eq!(loaded.config.logging.level, "debug");
        assert!(loaded.config.monitoring.enabled);
        assert!((loaded.config.monitoring.sample_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(loaded.env_overrides.len(), 3);
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut env = no_home_env();
        env.insert("VERITRAIL_BATCH_SIZE".into(), "lots".into());
        let result = load_with_env(None, &env);
        assert!(matches!(result, Err(ConfigError::EnvError { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = load_file(Path::new("/nonexistent/veritrail.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[monitoring\nenabled = ").unwrap();
        assert!(matches!(
            load_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&path, data).unwrap();
        assert!(matches!(
            try_read_file(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_set_field_creates_tables() {
        let mut root = toml::Value::Table(toml::map::Map::new());
        set_field(&mut root, "a.b.c", toml::Value::Integer(1));
        assert_eq!(root["a"]["b"]["c"].as_integer(), Some(1));
    }
}
