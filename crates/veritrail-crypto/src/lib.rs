//! Veritrail Crypto - hashing and signing primitives for audit-log integrity.
//!
//! This crate provides:
//! - BLAKE3 [`ContentHash`] and the chain [`GENESIS_HASH`]
//! - [`CanonicalHasher`], a deterministic field encoder for chain hashing
//! - Ed25519 key pairs and signatures for repair records
//! - A rotating signing keyring ([`SignatureVerifier`])
//!
//! # Example
//!
//! ```
//! use veritrail_crypto::{CanonicalHasher, ContentHash, GENESIS_HASH, KeyPair};
//!
//! let mut hasher = CanonicalHasher::new("example");
//! hasher.u64("sequence", 1).hash("previous", &GENESIS_HASH);
//! let hash: ContentHash = hasher.finalize();
//!
//! let keypair = KeyPair::generate();
//! let signature = keypair.sign(&hash);
//! assert!(keypair.public_key().verify(&hash, &signature).is_ok());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod keypair;
mod signature;
mod verifier;

pub use error::{CryptoError, CryptoResult};
pub use hash::{CanonicalHasher, ContentHash, GENESIS_HASH};
pub use keypair::{KeyId, KeyPair, PublicKey};
pub use signature::Signature;
pub use verifier::SignatureVerifier;
