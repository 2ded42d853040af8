//! Veritrail Storage - ordered key-value persistence.
//!
//! Every durable structure in Veritrail (audit events, chain heads,
//! monitoring checkpoints, alerts, the repair ledger and the operation
//! journal) lives in a [`KvStore`] under its own namespace. Keys within a
//! namespace are kept in byte order so that callers can encode sequence
//! numbers into keys and read contiguous ranges with [`KvStore::range`].
//!
//! Two backends are provided:
//!
//! - [`MemoryKvStore`], always available, for tests and ephemeral logs
//! - `SurrealKvStore`, behind the **`kv`** feature, an embedded ACID LSM store
//!
//! [`ScopedKvStore`] binds a namespace and adds typed JSON helpers.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{KvEntry, KvStore, MemoryKvStore, ScopedKvStore};

#[cfg(feature = "kv")]
pub use kv::SurrealKvStore;
