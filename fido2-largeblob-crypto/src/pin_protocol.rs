//! PIN/UV authentication protocols V1 and V2
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#sctn-pin-protocols>
//!
//! Both protocols operate on the raw ECDH x-coordinate `z` produced by
//! [`crate::ecdh::KeyPair::shared_secret`]:
//!
//! - **V1**: encryption and HMAC keys are both SHA-256(z); AES-256-CBC with a
//!   zero IV; auth params are truncated to 16 bytes.
//! - **V2**: the encryption key is derived with HKDF-SHA-256 (32-byte zero
//!   salt, info `"CTAP2 AES key"`); a random IV is prepended to the
//!   ciphertext; auth params are the full 32 bytes.
//!
//! All CTAP plaintexts (PIN hashes, tokens) are block-aligned, so CBC runs
//! without padding.

use crate::error::{CryptoError, Result};

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK_LENGTH: usize = 16;

/// PIN/UV authentication protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinUvAuthProtocol {
    /// Protocol 1 (AES-256-CBC, zero IV, 16-byte auth params)
    V1,
    /// Protocol 2 (HKDF-derived keys, random IV, 32-byte auth params)
    V2,
}

impl PinUvAuthProtocol {
    /// Protocol identifier as sent on the wire
    pub fn id(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    fn encryption_key(self, z: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        match self {
            Self::V1 => sha256_key(z),
            Self::V2 => hkdf_key(z, b"CTAP2 AES key"),
        }
    }

    /// Encrypt `plaintext` under the shared secret `z`
    ///
    /// `plaintext` must be a multiple of the AES block size. For V2 the
    /// random IV is prepended to the returned ciphertext.
    pub fn encrypt(self, z: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() || !plaintext.len().is_multiple_of(BLOCK_LENGTH) {
            return Err(CryptoError::EncryptionFailed);
        }
        let key = self.encryption_key(z);

        match self {
            Self::V1 => {
                let mut buf = plaintext.to_vec();
                cbc_encrypt(&key, &[0u8; BLOCK_LENGTH], &mut buf);
                Ok(buf)
            }
            Self::V2 => {
                let mut iv = [0u8; BLOCK_LENGTH];
                OsRng.fill_bytes(&mut iv);

                let mut out = Vec::with_capacity(BLOCK_LENGTH + plaintext.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(plaintext);
                cbc_encrypt(&key, &iv, &mut out[BLOCK_LENGTH..]);
                Ok(out)
            }
        }
    }

    /// Decrypt `ciphertext` under the shared secret `z`
    pub fn decrypt(self, z: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.encryption_key(z);

        match self {
            Self::V1 => {
                if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(BLOCK_LENGTH) {
                    return Err(CryptoError::DecryptionFailed);
                }
                let mut buf = ciphertext.to_vec();
                cbc_decrypt(&key, &[0u8; BLOCK_LENGTH], &mut buf);
                Ok(buf)
            }
            Self::V2 => {
                if ciphertext.len() <= BLOCK_LENGTH
                    || !(ciphertext.len() - BLOCK_LENGTH).is_multiple_of(BLOCK_LENGTH)
                {
                    return Err(CryptoError::DecryptionFailed);
                }
                let mut iv = [0u8; BLOCK_LENGTH];
                iv.copy_from_slice(&ciphertext[..BLOCK_LENGTH]);
                let mut buf = ciphertext[BLOCK_LENGTH..].to_vec();
                cbc_decrypt(&key, &iv, &mut buf);
                Ok(buf)
            }
        }
    }

    /// Compute the pinUvAuthParam for `data` under `key`
    ///
    /// `key` is a PIN/UV auth token. V1 truncates to 16 bytes, V2 returns
    /// the full HMAC-SHA-256.
    pub fn authenticate(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(data);
        let bytes = mac.finalize().into_bytes();

        match self {
            Self::V1 => bytes[..16].to_vec(),
            Self::V2 => bytes.to_vec(),
        }
    }
}

fn sha256_key(z: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&Sha256::digest(z));
    key
}

fn hkdf_key(z: &[u8; 32], info: &[u8]) -> Zeroizing<[u8; 32]> {
    let salt = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), z);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, key.as_mut_slice())
        .expect("32 bytes is a valid HKDF-SHA-256 output length");
    key
}

fn cbc_encrypt(key: &[u8; 32], iv: &[u8; BLOCK_LENGTH], buf: &mut [u8]) {
    let mut enc = Aes256CbcEnc::new(key.into(), iv.into());
    for block in buf.chunks_exact_mut(BLOCK_LENGTH) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn cbc_decrypt(key: &[u8; 32], iv: &[u8; BLOCK_LENGTH], buf: &mut [u8]) {
    let mut dec = Aes256CbcDec::new(key.into(), iv.into());
    for block in buf.chunks_exact_mut(BLOCK_LENGTH) {
        dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}
