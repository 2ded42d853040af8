//! Veritrail Telemetry - structured logging and correlation.
//!
//! This crate provides:
//! - [`LogConfig`] and [`setup_logging`] built on `tracing-subscriber`
//! - [`RequestContext`], carried by every integrity operation so that all
//!   log lines of one verification, scan or repair share a correlation id
//!
//! # Example
//!
//! ```rust,no_run
//! use veritrail_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), veritrail_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("veritrail_integrity=debug");
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("cli")
//!     .with_log_id("payments")
//!     .with_operation("verify");
//! let _guard = ctx.span().entered();
//! tracing::info!("Verifying chain");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
