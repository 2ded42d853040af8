//! Ed25519 signatures as stored on repair records.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::Signature as DalekSignature;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

const SIGNATURE_LEN: usize = 64;

/// A 64-byte Ed25519 signature over a record hash. Printed, parsed and
/// serialized as 128 hex digits, like the hashes next to it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Wrap raw signature bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// All-zero placeholder for a record whose hash is not computed yet.
    #[must_use]
    pub const fn unsigned() -> Self {
        Self([0; SIGNATURE_LEN])
    }

    /// Raw signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub(crate) fn to_dalek(self) -> DalekSignature {
        DalekSignature::from_bytes(&self.0)
    }

    fn parse_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHexEncoding)?;
        let sig: [u8; SIGNATURE_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidSignatureLength {
                    expected: SIGNATURE_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(sig))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, ..] = self.0;
        write!(f, "Signature({}..)", hex::encode([a, b, c, d]))
    }
}

impl FromStr for Signature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl From<DalekSignature> for Signature {
    fn from(sig: DalekSignature) -> Self {
        Self(sig.to_bytes())
    }
}
