//! Veritrail Test - shared test utilities for the integrity engine.
//!
//! Builders for correctly sealed chains, an in-memory event accessor with
//! fault injection, and small fixtures. Used as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! veritrail-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use veritrail_test::{ChainBuilder, FaultyAccessor, test_log_id};
//!
//! #[tokio::test]
//! async fn test_tampered_chain_is_detected() {
//!     let log = test_log_id();
//!     let accessor = FaultyAccessor::new();
//!     accessor.insert_all(&log, ChainBuilder::new(5).build());
//!     accessor.tamper(&log, 3, |e| e.action = Some("forged".into()));
//!     // ...verify and assert
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod builders;
pub mod fixtures;
pub mod mocks;

pub use builders::*;
pub use fixtures::*;
pub use mocks::*;
