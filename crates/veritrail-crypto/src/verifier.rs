//! Signing keyring with rotation.
//!
//! Exactly one key is active for signing at any time. Rotating the keyring
//! retires the active key but keeps it trusted, so records signed before a
//! rotation still verify afterwards. Revocation removes trust entirely.

use std::collections::HashMap;

use crate::error::{CryptoError, CryptoResult};
use crate::hash::ContentHash;
use crate::keypair::{KeyId, KeyPair, PublicKey};
use crate::signature::Signature;

/// Registry of trusted public keys plus the single active signing key.
///
/// # Example
///
/// ```
/// use veritrail_crypto::{ContentHash, KeyPair, SignatureVerifier};
///
/// let record = ContentHash::hash(b"record");
/// let mut keyring = SignatureVerifier::new(KeyPair::generate());
/// let (key_id, signature) = keyring.sign(&record);
///
/// keyring.rotate(KeyPair::generate());
/// assert!(keyring.verify(&key_id, &record, &signature).is_ok());
/// ```
#[derive(Debug)]
pub struct SignatureVerifier {
    active: KeyPair,
    trusted_keys: HashMap<KeyId, PublicKey>,
    retired: Vec<KeyId>,
}

impl SignatureVerifier {
    /// Create a keyring whose active signing key is `active`.
    #[must_use]
    pub fn new(active: KeyPair) -> Self {
        let mut trusted_keys = HashMap::new();
        trusted_keys.insert(active.key_id(), active.public_key());
        Self {
            active,
            trusted_keys,
            retired: Vec::new(),
        }
    }

    /// Key ID of the active signing key.
    #[must_use]
    pub fn active_key_id(&self) -> KeyId {
        self.active.key_id()
    }

    /// Sign with the active key, returning the signer's key ID alongside the
    /// signature.
    #[must_use]
    pub fn sign(&self, digest: &ContentHash) -> (KeyId, Signature) {
        (self.active.key_id(), self.active.sign(digest))
    }

    /// Replace the active key. The previous key stays trusted for
    /// verification and is returned.
    pub fn rotate(&mut self, next: KeyPair) -> KeyId {
        let retired = self.active.key_id();
        self.trusted_keys
            .insert(next.key_id(), next.public_key());
        self.active = next;
        self.retired.push(retired);
        retired
    }

    /// Trust an externally managed public key (for example one retired by
    /// another process before restart).
    pub fn add_trusted_key(&mut self, key: PublicKey) -> KeyId {
        let key_id = key.key_id();
        self.trusted_keys.insert(key_id, key);
        key_id
    }

    /// Revoke trust in a retired key. The active key cannot be revoked.
    ///
    /// Returns `true` if the key was trusted and has been removed.
    pub fn revoke(&mut self, key_id: &KeyId) -> bool {
        if *key_id == self.active.key_id() {
            return false;
        }
        self.retired.retain(|k| k != key_id);
        self.trusted_keys.remove(key_id).is_some()
    }

    /// Check if a key ID is trusted.
    #[must_use]
    pub fn is_trusted(&self, key_id: &KeyId) -> bool {
        self.trusted_keys.contains_key(key_id)
    }

    /// Key IDs retired by rotation, oldest first.
    #[must_use]
    pub fn retired_key_ids(&self) -> &[KeyId] {
        &self.retired
    }

    /// Verify a signature made by a trusted key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UntrustedKey`] if the key is unknown, or
    /// [`CryptoError::SignatureVerificationFailed`] if the signature is bad.
    pub fn verify(
        &self,
        key_id: &KeyId,
        digest: &ContentHash,
        signature: &Signature,
    ) -> CryptoResult<()> {
        let key = self
            .trusted_keys
            .get(key_id)
            .ok_or_else(|| CryptoError::UntrustedKey {
                key_id: key_id.to_string(),
            })?;
        key.verify(digest, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_key_is_trusted() {
        let keyring = SignatureVerifier::new(KeyPair::generate());
        assert!(keyring.is_trusted(&keyring.active_key_id()));
        assert!(keyring.retired_key_ids().is_empty());
    }

    #[test]
    fn test_rotation_keeps_old_signatures_valid() {
        let mut keyring = SignatureVerifier::new(KeyPair::generate());
        let (old_id, sig) = keyring.sign(&ContentHash::hash(b"before rotation"));

        let retired = keyring.rotate(KeyPair::generate());
        assert_eq!(retired, old_id);
        assert_ne!(keyring.active_key_id(), old_id);
        assert!(keyring.verify(&old_id, &ContentHash::hash(b"before rotation"), &sig).is_ok());

        let (new_id, new_sig) = keyring.sign(&ContentHash::hash(b"after rotation"));
        assert_eq!(new_id, keyring.active_key_id());
        assert!(keyring.verify(&new_id, &ContentHash::hash(b"after rotation"), &new_sig).is_ok());
    }

    #[test]
    fn test_revoked_key_no_longer_verifies() {
        let mut keyring = SignatureVerifier::new(KeyPair::generate());
        let (old_id, sig) = keyring.sign(&ContentHash::hash(b"record"));
        keyring.rotate(KeyPair::generate());

        assert!(keyring.revoke(&old_id));
        assert!(matches!(
            keyring.verify(&old_id, &ContentHash::hash(b"record"), &sig),
            Err(CryptoError::UntrustedKey { .. })
        ));
    }

    #[test]
    fn test_cannot_revoke_active_key() {
        let mut keyring = SignatureVerifier::new(KeyPair::generate());
        let active = keyring.active_key_id();
        assert!(!keyring.revoke(&active));
        assert!(keyring.is_trusted(&active));
    }

    #[test]
    fn test_external_key_can_be_trusted() {
        let external = KeyPair::generate();
        let mut keyring = SignatureVerifier::new(KeyPair::generate());
        let id = keyring.add_trusted_key(external.public_key());

        let sig = external.sign(&ContentHash::hash(b"imported"));
        assert!(keyring.verify(&id, &ContentHash::hash(b"imported"), &sig).is_ok());
        assert!(keyring.verify(&id, &ContentHash::hash(b"tampered"), &sig).is_err());
    }
}
