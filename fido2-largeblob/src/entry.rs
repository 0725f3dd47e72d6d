//! Large-blob entry codec
//!
//! One element of the large-blob array: the plaintext is deflated, then
//! sealed with AES-256-GCM under the per-credential key. The associated data
//! binds the original (pre-compression) size into the tag, so a tampered
//! `origSize` fails authentication rather than mis-sizing the inflation.
//!
//! Wire form is a definite CBOR map `{1: ciphertext, 2: nonce, 3: origSize}`;
//! unknown keys are tolerated and ignored.

use crate::cbor::{DecodeError, Decoder, MapBuilder};
use crate::error::Result;

use log::debug;
use zeroize::Zeroizing;

use fido2_largeblob_crypto::aead::{self, NONCE_LENGTH, TAG_LENGTH};
use fido2_largeblob_crypto::compress;

/// AAD prefix, ASCII "blob"
const AAD_PREFIX: [u8; 4] = [0x62, 0x6c, 0x6f, 0x62];

/// One sealed element of the large-blob array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeBlobEntry {
    /// Sealed, deflated plaintext plus GCM tag
    pub ciphertext: Vec<u8>,
    /// GCM nonce
    pub nonce: [u8; NONCE_LENGTH],
    /// Length of the pre-compression plaintext
    pub orig_size: usize,
}

/// Associated data for an entry: "blob" followed by the original size as a
/// little-endian 64-bit integer
fn aad(orig_size: u64) -> Zeroizing<[u8; 12]> {
    let mut buf = Zeroizing::new([0u8; 12]);
    buf[..4].copy_from_slice(&AAD_PREFIX);
    buf[4..].copy_from_slice(&orig_size.to_le_bytes());
    buf
}

impl LargeBlobEntry {
    /// Compress and seal `plaintext` under `key` with a fresh nonce
    pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Self> {
        let deflated = Zeroizing::new(compress::deflate(plaintext)?);
        let nonce = aead::random_nonce();
        let aad = aad(plaintext.len() as u64);
        let ciphertext = aead::seal(key, &nonce, aad.as_slice(), &deflated)?;

        Ok(Self {
            ciphertext,
            nonce,
            orig_size: plaintext.len(),
        })
    }

    /// Decrypt the entry under `key`
    ///
    /// Returns the still-deflated plaintext; an authentication failure is an
    /// error. Use [`LargeBlobEntry::unseal`] to also inflate.
    pub fn open(&self, key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>> {
        let aad = aad(self.orig_size as u64);
        let deflated = aead::open(key, &self.nonce, aad.as_slice(), &self.ciphertext)?;
        Ok(Zeroizing::new(deflated))
    }

    /// Decrypt and inflate the entry under `key` to exactly `orig_size` bytes
    pub fn unseal(&self, key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>> {
        let deflated = self.open(key)?;
        Ok(Zeroizing::new(compress::inflate(&deflated, self.orig_size)?))
    }

    /// Encode as a CBOR map `{1: ciphertext, 2: nonce, 3: origSize}`
    pub fn encode(&self) -> Result<Vec<u8>> {
        MapBuilder::new()
            .insert_bytes(1, &self.ciphertext)?
            .insert_bytes(2, &self.nonce)?
            .insert(3, self.orig_size as u64)?
            .build()
    }

    /// Decode one array element
    ///
    /// The element must be a definite map. Unknown keys — non-integer or
    /// beyond 3 — are skipped; the known fields are validated strictly:
    /// the ciphertext must at least hold the tag, the nonce must be exactly
    /// 12 bytes and the original size must be non-zero.
    pub fn decode(raw: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut d = Decoder::new(raw);
        let pairs = d.map_header()?;

        let mut ciphertext: Option<Vec<u8>> = None;
        let mut nonce: Option<[u8; NONCE_LENGTH]> = None;
        let mut orig_size: usize = 0;

        for _ in 0..pairs {
            if !d.peeks_uint() {
                d.skip()?;
                d.skip()?;
                continue;
            }
            match d.uint()? {
                1 => {
                    let ct = d.bytes()?;
                    if ct.len() < TAG_LENGTH {
                        debug!("entry decode: ciphertext shorter than tag");
                        return Err(DecodeError::Malformed);
                    }
                    ciphertext = Some(ct.to_vec());
                }
                2 => {
                    let bytes = d.bytes()?;
                    if bytes.len() != NONCE_LENGTH {
                        debug!("entry decode: nonce length {}", bytes.len());
                        return Err(DecodeError::Malformed);
                    }
                    let mut buf = [0u8; NONCE_LENGTH];
                    buf.copy_from_slice(bytes);
                    nonce = Some(buf);
                }
                3 => {
                    orig_size = usize::try_from(d.uint()?).map_err(|_| DecodeError::Malformed)?;
                }
                _ => d.skip()?,
            }
        }

        if !d.is_exhausted() {
            return Err(DecodeError::Malformed);
        }

        match (ciphertext, nonce, orig_size) {
            (Some(ciphertext), Some(nonce), orig_size) if orig_size > 0 => Ok(Self {
                ciphertext,
                nonce,
                orig_size,
            }),
            _ => Err(DecodeError::Malformed),
        }
    }
}
