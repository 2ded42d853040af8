//! Ed25519 keys that sign repair records.
//!
//! A repair record is reduced to a domain-separated [`ContentHash`] and that
//! hash is what gets signed. Keys are named by a [`KeyId`], the first eight
//! bytes of the public key, which is what a record stores as its signer.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::hash::ContentHash;
use crate::signature::Signature;

const SECRET_LEN: usize = 32;
const PUBLIC_LEN: usize = 32;
const KEY_ID_LEN: usize = 8;

fn io_error(e: std::io::Error) -> CryptoError {
    CryptoError::IoError(e.to_string())
}

// ---------------------------------------------------------------------------
// Key ids
// ---------------------------------------------------------------------------

/// Names the key that signed a record. Printed and parsed as 16 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId([u8; KEY_ID_LEN]);

impl KeyId {
    fn of(public: &[u8; PUBLIC_LEN]) -> Self {
        let [a, b, c, d, e, f, g, h, ..] = *public;
        Self([a, b, c, d, e, f, g, h])
    }

    /// Raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl FromStr for KeyId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHexEncoding)?;
        let id: [u8; KEY_ID_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_ID_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(id))
    }
}

// ---------------------------------------------------------------------------
// Signing key
// ---------------------------------------------------------------------------

/// The engine's signing key. The secret half is zeroized on drop and never
/// leaves this type except when a new key file is written.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    signing: SigningKey,
    #[zeroize(skip)]
    public: PublicKey,
}

impl KeyPair {
    /// A fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing(SigningKey::generate(&mut OsRng))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let public = PublicKey(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    fn from_secret(secret: &[u8]) -> CryptoResult<Self> {
        let secret: Zeroizing<[u8; SECRET_LEN]> =
            Zeroizing::new(secret.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SECRET_LEN,
                actual: secret.len(),
            })?);
        Ok(Self::from_signing(SigningKey::from_bytes(&secret)))
    }

    /// Id recorded as the signer of everything this key signs.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.public.key_id()
    }

    /// The shareable half.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Sign a record hash.
    #[must_use]
    pub fn sign(&self, digest: &ContentHash) -> Signature {
        Signature::from(self.signing.sign(digest.as_bytes()))
    }

    /// Read the key at `path`, creating it on first use.
    ///
    /// The file holds the 32 raw secret bytes. It is created exclusively
    /// with mode `0o600` on Unix, so two processes racing on first start end
    /// up sharing one key. Symlinks are refused.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] on I/O failures or symlinks, and
    /// [`CryptoError::InvalidKeyLength`] if the file has the wrong length.
    pub fn load_or_generate(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        match Self::create_key_file(path)? {
            Some(created) => Ok(created),
            None => Self::read_key_file(path),
        }
    }

    /// Generate a key into a new file. `None` when the file already exists.
    fn create_key_file(path: &Path) -> CryptoResult<Option<Self>> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_error(e)),
        };
        let key = Self::generate();
        let secret = Zeroizing::new(key.signing.to_bytes());
        file.write_all(secret.as_slice()).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        Ok(Some(key))
    }

    fn read_key_file(path: &Path) -> CryptoResult<Self> {
        let meta = std::fs::symlink_metadata(path).map_err(io_error)?;
        if meta.file_type().is_symlink() {
            return Err(CryptoError::IoError(format!(
                "refusing to read key file {}: path is a symlink",
                path.display()
            )));
        }
        let bytes = Zeroizing::new(std::fs::read(path).map_err(io_error)?);
        Self::from_secret(&bytes)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// A trusted verification key, serialized as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_LEN]);

impl PublicKey {
    /// Wrap raw key bytes. Whether they form a valid curve point is checked
    /// when verifying.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PUBLIC_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_LEN] {
        &self.0
    }

    /// Id of this key.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        KeyId::of(&self.0)
    }

    /// Check that `signature` is this key's signature over `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a valid
    /// key and [`CryptoError::SignatureVerificationFailed`] if the signature
    /// does not match.
    pub fn verify(&self, digest: &ContentHash, signature: &Signature) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        key.verify(digest.as_bytes(), &signature.to_dalek())
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.key_id())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHexEncoding)?;
        let key: [u8; PUBLIC_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(key))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_hash(body: &str) -> ContentHash {
        ContentHash::hash_with_domain("veritrail.test.record", body.as_bytes())
    }

    #[test]
    fn test_signed_record_hash_verifies_only_for_that_hash() {
        let key = KeyPair::generate();
        let digest = record_hash("seq 7: superseded abc, replacement def");
        let signature = key.sign(&digest);

        assert!(key.public_key().verify(&digest, &signature).is_ok());
        assert!(matches!(
            key.public_key().verify(&record_hash("seq 7: tampered"), &signature),
            Err(CryptoError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_other_key_does_not_verify() {
        let digest = record_hash("record");
        let signature = KeyPair::generate().sign(&digest);
        assert!(KeyPair::generate().public_key().verify(&digest, &signature).is_err());
    }

    #[test]
    fn test_key_id_round_trips_as_hex() {
        let key = KeyPair::generate();
        let id = key.key_id();
        let printed = id.to_string();
        assert_eq!(printed.len(), 16);
        assert_eq!(printed.parse::<KeyId>().unwrap(), id);
        assert_eq!(id.as_bytes()[..], key.public_key().as_bytes()[..8]);

        assert!(matches!("zz".parse::<KeyId>(), Err(CryptoError::InvalidHexEncoding)));
        assert!(matches!(
            "abcd".parse::<KeyId>(),
            Err(CryptoError::InvalidKeyLength { expected: 8, actual: 2 })
        ));
    }

    #[test]
    fn test_public_key_is_serialized_as_hex() {
        let public = KeyPair::generate().public_key();
        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{}\"", hex::encode(public.as_bytes())));
        assert_eq!(serde_json::from_str::<PublicKey>(&json).unwrap(), public);
    }

    #[test]
    fn test_secret_of_wrong_length_is_rejected() {
        assert!(matches!(
            KeyPair::from_secret(&[7u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("repair.key");

        let first = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 32);
        let second = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.key_id(), second.key_id());

        let digest = record_hash("signed before restart");
        assert!(second.public_key().verify(&digest, &first.sign(&digest)).is_ok());
    }

    #[test]
    fn test_truncated_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repair.key");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(
            KeyPair::load_or_generate(&path),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private_and_symlinks_are_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repair.key");
        KeyPair::load_or_generate(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let link = dir.path().join("linked.key");
        std::os::unix::fs::symlink(&path, &link).unwrap();
        assert!(matches!(
            KeyPair::load_or_generate(&link),
            Err(CryptoError::IoError(_))
        ));
    }
}
