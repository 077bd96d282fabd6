//! Envelope encryption for entry values.
//!
//! A single master key (held only in memory, zeroized on drop) never
//! encrypts data directly. Per-classification, per-version subkeys are
//! derived from it on demand via HKDF-SHA256, so rotating a
//! classification's key only bumps a version counter — no existing
//! ciphertext needs to be touched. `key_version` travels with every
//! entry so decryption always re-derives the right subkey.

use std::collections::HashMap;
use std::sync::Mutex;

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Nonce length for XChaCha20-Poly1305 (extended, 192-bit nonce).
pub const NONCE_LEN: usize = 24;
const HKDF_INFO_PREFIX: &[u8] = b"veilkv";
/// Default key classification used for ordinary entry values.
pub const DEFAULT_CLASS: &str = "data";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random number generator failure")]
    Rng,
    #[error("ciphertext failed authentication")]
    CorruptedCiphertext,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Holds the master key and per-classification rotation counters.
pub struct Crypto {
    master_key: [u8; 32],
    versions: Mutex<HashMap<String, u32>>,
}

impl Crypto {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_slice(master_key: &[u8]) -> Result<Self, CryptoError> {
        if master_key.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(master_key.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(master_key);
        Ok(Self::new(key))
    }

    /// Generates a fresh random master key, for first-time engine creation.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self::new(key)
    }

    pub fn master_key(&self) -> &[u8; 32] {
        &self.master_key
    }

    fn derive_key(&self, class: &str, version: u32) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut info = Vec::with_capacity(HKDF_INFO_PREFIX.len() + class.len() + 4);
        info.extend_from_slice(HKDF_INFO_PREFIX);
        info.extend_from_slice(class.as_bytes());
        info.extend_from_slice(&version.to_le_bytes());
        let mut out = [0u8; 32];
        hk.expand(&info, &mut out)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        out
    }

    /// Current key version for a classification. Starts at 1.
    pub fn current_version(&self, class: &str) -> u32 {
        let mut guard = self.versions.lock().expect("crypto version lock poisoned");
        *guard.entry(class.to_string()).or_insert(1)
    }

    /// Advances the classification's key version and returns the new value.
    /// Entries already written under older versions remain decryptable.
    pub fn rotate(&self, class: &str) -> u32 {
        let mut guard = self.versions.lock().expect("crypto version lock poisoned");
        let entry = guard.entry(class.to_string()).or_insert(1);
        *entry += 1;
        *entry
    }

    pub fn encrypt(
        &self,
        class: &str,
        version: u32,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let key = self.derive_key(class, version);
        let cipher = XChaCha20Poly1305::new((&key).into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Rng)?;
        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    pub fn decrypt(
        &self,
        class: &str,
        version: u32,
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::CorruptedCiphertext);
        }
        let key = self.derive_key(class, version);
        let cipher = XChaCha20Poly1305::new((&key).into());
        let nonce = XNonce::from_slice(nonce);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::CorruptedCiphertext)
    }
}

impl Drop for Crypto {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_under_same_version() {
        let crypto = Crypto::generate();
        let (nonce, ct) = crypto
            .encrypt(DEFAULT_CLASS, 1, b"hello world", b"aad")
            .unwrap();
        let pt = crypto
            .decrypt(DEFAULT_CLASS, 1, &nonce, &ct, b"aad")
            .unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn rejects_wrong_aad() {
        let crypto = Crypto::generate();
        let (nonce, ct) = crypto.encrypt(DEFAULT_CLASS, 1, b"secret", b"key-a").unwrap();
        assert!(crypto.decrypt(DEFAULT_CLASS, 1, &nonce, &ct, b"key-b").is_err());
    }

    #[test]
    fn rotation_keeps_old_versions_readable() {
        let crypto = Crypto::generate();
        assert_eq!(crypto.current_version(DEFAULT_CLASS), 1);
        let (nonce, ct) = crypto.encrypt(DEFAULT_CLASS, 1, b"v1-data", b"k").unwrap();
        let new_version = crypto.rotate(DEFAULT_CLASS);
        assert_eq!(new_version, 2);
        assert_eq!(crypto.current_version(DEFAULT_CLASS), 2);
        let pt = crypto.decrypt(DEFAULT_CLASS, 1, &nonce, &ct, b"k").unwrap();
        assert_eq!(pt, b"v1-data");
    }

    #[test]
    fn different_versions_yield_different_ciphertext() {
        let crypto = Crypto::generate();
        let (n1, ct1) = crypto.encrypt(DEFAULT_CLASS, 1, b"same", b"k").unwrap();
        let (n2, ct2) = crypto.encrypt(DEFAULT_CLASS, 2, b"same", b"k").unwrap();
        assert_ne!((n1, ct1), (n2, ct2));
    }
}
