//! Prelude module - commonly used types for convenient import.
//!
//! Use `use veritrail_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Hashing
pub use crate::{CanonicalHasher, ContentHash, GENESIS_HASH};

// Keys and signatures
pub use crate::{KeyId, KeyPair, PublicKey, Signature, SignatureVerifier};
