//! Cryptographic primitives for container sealing.
//!
//! A container payload is sealed with AES-256-GCM under a 256-bit container
//! key. Password credentials are stretched into that key with scrypt over the
//! NFC-normalized passphrase; raw-key credentials are used as-is.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::engine::REQUIRED_KEY_LENGTH;

/// Length of the scrypt salt stored in the container header.
pub const SALT_LENGTH: usize = 32;

/// Length of the AES-GCM nonce stored in the container header.
pub const NONCE_LENGTH: usize = 12;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    // =========================================================================
    // USER ERRORS - Typically wrong credential or corrupted input
    // =========================================================================
    /// The payload failed authentication.
    ///
    /// A wrong password or key and a tampered container are indistinguishable
    /// here: both yield the wrong key and the GCM tag check fails.
    #[error("Container authentication failed - wrong credential or corrupted container")]
    AuthenticationFailed,

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // =========================================================================
    // PROGRAMMING ERRORS - Invalid parameters or implementation bugs
    // =========================================================================
    /// Invalid scrypt parameters.
    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    /// A raw key had the wrong length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Encryption failed.
    #[error("Encryption failed")]
    SealFailed,
}

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost `N`.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelization.
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests.
    pub const fn insecure_fast() -> Self {
        Self {
            log_n: 4,
            r: 8,
            p: 1,
        }
    }
}

/// A 256-bit container key, zeroized on drop.
pub struct ContainerKey(Zeroizing<[u8; REQUIRED_KEY_LENGTH]>);

impl std::fmt::Debug for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContainerKey([REDACTED])")
    }
}

impl ContainerKey {
    /// Use raw key bytes directly.
    pub fn from_raw(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != REQUIRED_KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: REQUIRED_KEY_LENGTH,
                actual: key.len(),
            });
        }
        let mut bytes = Zeroizing::new([0u8; REQUIRED_KEY_LENGTH]);
        bytes.copy_from_slice(key);
        Ok(Self(bytes))
    }

    /// Derive a key from a password with scrypt.
    #[instrument(level = "debug", skip(password, salt))]
    pub fn derive(password: &str, salt: &[u8], params: KdfParams) -> Result<Self, CryptoError> {
        let normalized = Zeroizing::new(password.nfc().collect::<String>());
        let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, REQUIRED_KEY_LENGTH)
            .map_err(|e| CryptoError::InvalidScryptParams(e.to_string()))?;

        let mut key = Zeroizing::new([0u8; REQUIRED_KEY_LENGTH]);
        scrypt::scrypt(normalized.as_bytes(), salt, &scrypt_params, &mut key[..])
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        debug!("Container key derived");
        Ok(Self(key))
    }

    /// Constant-time key comparison.
    pub fn matches(&self, other: &ContainerKey) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }

    fn cipher(&self) -> Aes256Gcm {
        let key: &Key<Aes256Gcm> = (&*self.0).into();
        Aes256Gcm::new(key)
    }

    /// Encrypt `plaintext` under a fresh nonce, authenticating `aad`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::SealFailed)
    }

    /// Decrypt and authenticate `ciphertext`.
    pub fn open(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
        nonce: &[u8; NONCE_LENGTH],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map(Zeroizing::new)
            .map_err(|_| {
                warn!("Container payload failed authentication");
                CryptoError::AuthenticationFailed
            })
    }
}

/// Fresh random salt.
pub fn random_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_with_aad() {
        let key = ContainerKey::from_raw(&[7u8; 32]).unwrap();
        let nonce = random_nonce();
        let sealed = key.seal(b"payload", b"header", &nonce).unwrap();

        let opened = key.open(&sealed, b"header", &nonce).unwrap();
        assert_eq!(opened.as_slice(), b"payload");

        // Header is bound to the payload
        assert!(matches!(
            key.open(&sealed, b"other header", &nonce),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let good = ContainerKey::from_raw(&[7u8; 32]).unwrap();
        let bad = ContainerKey::from_raw(&[8u8; 32]).unwrap();
        let nonce = random_nonce();
        let sealed = good.seal(b"payload", b"", &nonce).unwrap();

        assert!(matches!(
            bad.open(&sealed, b"", &nonce),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_raw_key_length_checked() {
        let err = ContainerKey::from_raw(&[0u8; 31]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 31
            }
        ));
    }

    #[test]
    fn test_derive_is_deterministic_per_salt() {
        let salt = random_salt();
        let a = ContainerKey::derive("secret", &salt, KdfParams::insecure_fast()).unwrap();
        let b = ContainerKey::derive("secret", &salt, KdfParams::insecure_fast()).unwrap();
        let c = ContainerKey::derive("wrong", &salt, KdfParams::insecure_fast()).unwrap();

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_derive_normalizes_passphrase() {
        let salt = random_salt();
        // "é" precomposed vs. "e" + combining acute accent
        let composed = ContainerKey::derive("caf\u{e9}", &salt, KdfParams::insecure_fast()).unwrap();
        let decomposed =
            ContainerKey::derive("cafe\u{301}", &salt, KdfParams::insecure_fast()).unwrap();
        assert!(composed.matches(&decomposed));
    }

    #[test]
    fn test_invalid_scrypt_params() {
        let params = KdfParams {
            log_n: 0,
            r: 0,
            p: 0,
        };
        assert!(matches!(
            ContainerKey::derive("x", &random_salt(), params),
            Err(CryptoError::InvalidScryptParams(_))
        ));
    }
}
