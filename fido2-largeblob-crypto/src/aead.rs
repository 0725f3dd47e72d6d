//! AES-256-GCM sealing for large-blob entries
//!
//! Every entry in the large-blob array is sealed under a per-credential
//! 32-byte key with a fresh 12-byte nonce. The 16-byte GCM tag is appended
//! to the ciphertext.

use crate::error::{CryptoError, Result};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;
use rand::rngs::OsRng;

/// Nonce length in bytes
pub const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length in bytes
pub const TAG_LENGTH: usize = 16;

/// Generate a fresh random nonce
pub fn random_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key`, binding `aad` into the tag
///
/// Returns `ciphertext || tag`.
pub fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LENGTH],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    cipher
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt `ciphertext || tag` under `key`, verifying `aad`
///
/// Fails with an authentication error if the tag does not verify.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LENGTH],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::DecryptionFailed)
}
