//! Content hashing using BLAKE3.
//!
//! Provides the 32-byte [`ContentHash`] used to link audit events into a
//! chain, and [`CanonicalHasher`], a length-prefixed field encoder that makes
//! a hash independent of field iteration order, platform, and process.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The well-known hash that precedes the first event of every chain.
pub const GENESIS_HASH: ContentHash = ContentHash::zero();

/// A BLAKE3 content hash (32 bytes).
///
/// Used for:
/// - Audit chain linking (each event hashes its predecessor)
/// - Repair ledger and operation journal linking
/// - Burst detection (identical content hashes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary data.
    #[must_use]
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash multiple data chunks (concatenated).
    #[must_use]
    pub fn hash_multi(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a zero hash (the genesis value).
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Check if this is the zero hash.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a slice.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn try_from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Encode as hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for log lines.
    #[must_use]
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Decode from hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Encode as base64 string.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Create a hash with a prefix (for domain separation).
    ///
    /// # Example
    ///
    /// ```
    /// use veritrail_crypto::ContentHash;
    ///
    /// let hash = ContentHash::hash_with_domain("veritrail repair-record", b"data");
    /// assert_ne!(hash, ContentHash::hash(b"data"));
    /// ```
    #[must_use]
    pub fn hash_with_domain(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(domain);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Deterministic, field-tagged BLAKE3 encoder.
///
/// Every field is written as `len(tag) || tag || len(value) || value` with
/// little-endian `u64` lengths, so two different field sequences can never
/// produce the same byte stream. Optional fields write an explicit presence
/// byte. Callers are responsible for feeding fields in a fixed order.
pub struct CanonicalHasher {
    inner: blake3::Hasher,
}

impl CanonicalHasher {
    /// Start a hasher keyed to a domain-separation context string.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            inner: blake3::Hasher::new_derive_key(domain),
        }
    }

    fn write_len_prefixed(&mut self, bytes: &[u8]) {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.inner.update(&len.to_le_bytes());
        self.inner.update(bytes);
    }

    /// Append a raw byte field.
    pub fn bytes(&mut self, tag: &str, value: &[u8]) -> &mut Self {
        self.write_len_prefixed(tag.as_bytes());
        self.write_len_prefixed(value);
        self
    }

    /// Append a UTF-8 string field.
    pub fn str(&mut self, tag: &str, value: &str) -> &mut Self {
        self.bytes(tag, value.as_bytes())
    }

    /// Append an optional string field. Absence is encoded distinctly from
    /// the empty string.
    pub fn opt_str(&mut self, tag: &str, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => {
                let mut buf = Vec::with_capacity(v.len().saturating_add(1));
                buf.push(1);
                buf.extend_from_slice(v.as_bytes());
                self.bytes(tag, &buf)
            },
            None => self.bytes(tag, &[0]),
        }
    }

    /// Append an unsigned integer field.
    pub fn u64(&mut self, tag: &str, value: u64) -> &mut Self {
        self.bytes(tag, &value.to_le_bytes())
    }

    /// Append a signed integer field.
    pub fn i64(&mut self, tag: &str, value: i64) -> &mut Self {
        self.bytes(tag, &value.to_le_bytes())
    }

    /// Append a hash field.
    pub fn hash(&mut self, tag: &str, value: &ContentHash) -> &mut Self {
        self.bytes(tag, value.as_bytes())
    }

    /// Finish and return the digest.
    #[must_use]
    pub fn finalize(&self) -> ContentHash {
        ContentHash(*self.inner.finalize().as_bytes())
    }
}

impl fmt::Debug for CanonicalHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalHasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_basic() {
        let data = b"hello world";
        let hash = ContentHash::hash(data);

        assert_eq!(hash, ContentHash::hash(data));
        assert_ne!(hash, ContentHash::hash(b"different"));
    }

    #[test]
    fn test_hash_multi() {
        let parts: &[&[u8]] = &[b"hello", b" ", b"world"];
        assert_eq!(
            ContentHash::hash_multi(parts),
            ContentHash::hash(b"hello world")
        );
    }

    #[test]
    fn test_genesis_is_zero() {
        assert!(GENESIS_HASH.is_zero());
        assert!(!ContentHash::hash(b"data").is_zero());
    }

    #[test]
    fn test_hex_decoding_rejects_short_input() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_domain_separation() {
        let data = b"same data";
        assert_ne!(
            ContentHash::hash_with_domain("domain1", data),
            ContentHash::hash_with_domain("domain2", data)
        );
    }

    #[test]
    fn test_serde_uses_hex() {
        let hash = ContentHash::hash(b"test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let decoded: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn test_canonical_hasher_is_deterministic() {
        let build = || {
            let mut h = CanonicalHasher::new("test");
            h.u64("seq", 7).str("actor", "alice").opt_str("target", None);
            h.finalize()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_canonical_hasher_field_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc".
        let mut left = CanonicalHasher::new("test");
        left.str("x", "ab").str("y", "c");
        let mut right = CanonicalHasher::new("test");
        right.str("x", "a").str("y", "bc");
        assert_ne!(left.finalize(), right.finalize());
    }

    #[test]
    fn test_canonical_hasher_absent_differs_from_empty() {
        let mut absent = CanonicalHasher::new("test");
        absent.opt_str("target", None);
        let mut empty = CanonicalHasher::new("test");
        empty.opt_str("target", Some(""));
        assert_ne!(absent.finalize(), empty.finalize());
    }
}
