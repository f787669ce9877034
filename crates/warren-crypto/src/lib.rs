//! # warren-crypto: cluster-key secret encryption
//!
//! Secrets are sealed with AES-256-GCM under a symmetric cluster key
//! provisioned at init (distribution is the CA subsystem's concern). The
//! store only ever holds the sealed form; workers unseal just before
//! mounting. The sealed layout is `nonce (12 bytes) || ciphertext+tag`,
//! with a fresh random nonce per seal.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

/// Bytes of the AES-256 key.
pub const KEY_LEN: usize = 32;

/// Bytes of the GCM nonce prefix.
pub const NONCE_LEN: usize = 12;

/// Errors from sealing and unsealing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("cluster key must be {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),

    #[error("cluster key is not valid hex")]
    BadKeyEncoding,

    #[error("sealed secret is too short to contain a nonce")]
    TooShort,

    #[error("decryption failed: wrong key or corrupted ciphertext")]
    Unsealable,
}

/// The symmetric cluster key.
#[derive(Clone)]
pub struct ClusterKey([u8; KEY_LEN]);

impl ClusterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parses the hex form used in configuration files.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.trim();
        if hex.len() != KEY_LEN * 2 {
            return Err(CryptoError::BadKeyLength(hex.len() / 2));
        }
        let mut bytes = [0u8; KEY_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| CryptoError::BadKeyEncoding)?;
        }
        Ok(Self(bytes))
    }

    /// Generates a fresh random key (cluster init).
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Seals plaintext: random nonce prepended to ciphertext+tag.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut sealed = cipher
            .encrypt(nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.append(&mut sealed);
        out
    }

    /// Unseals `nonce || ciphertext+tag`. Fails on tampering or key
    /// mismatch.
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Unsealable)
    }
}

impl std::fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never render key material.
        f.write_str("ClusterKey(..)")
    }
}
