#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for the Veritrail integrity engine.
//!
//! ```rust,no_run
//! use veritrail_config::IntegrityConfig;
//!
//! let loaded = IntegrityConfig::load(None).unwrap();
//! println!("batch size: {}", loaded.config.verification.batch_size);
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. `VERITRAIL_*` environment variables (fixed set, see [`loader`])
//! 2. The explicit file passed to [`IntegrityConfig::load`], otherwise
//!    `$VERITRAIL_HOME/config.toml`, otherwise `~/.veritrail/config.toml`
//! 3. Embedded defaults (`defaults.toml` compiled into the binary)
//!
//! This crate has no dependencies on other Veritrail crates. The engine
//! converts these sections into its own types.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::LoadedConfig;
pub use types::*;

impl IntegrityConfig {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any layer is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<LoadedConfig> {
        loader::load(explicit)
    }

    /// Validate this configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }
}
