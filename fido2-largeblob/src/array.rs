//! Large-blob array: integrity trailer, element storage and lookup
//!
//! The serialized array is a definite CBOR array of entry maps followed by a
//! 16-byte trailer, the truncated SHA-256 of the CBOR body. Elements are kept
//! as raw bytes so that entries this client cannot decode — written by other
//! clients, or using future fields — survive a rewrite untouched.
//!
//! Lookup is trial decryption: the array carries no index, so each element is
//! decoded and decrypted under the caller's key until one authenticates.
//! Failures along the way are expected and benign.

use crate::blob::Blob;
use crate::cbor::{self, Decoder};
use crate::entry::LargeBlobEntry;
use crate::error::Result;

use log::debug;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use fido2_largeblob_crypto::compress;

/// Trailer length: the first 16 bytes of SHA-256 over the CBOR body
pub const DIGEST_LENGTH: usize = 16;

/// Truncation digest over a serialized CBOR body
pub fn wire_digest(body: &[u8]) -> [u8; DIGEST_LENGTH] {
    let full = Sha256::digest(body);
    let mut dgst = [0u8; DIGEST_LENGTH];
    dgst.copy_from_slice(&full[..DIGEST_LENGTH]);
    dgst
}

/// In-memory large-blob array
///
/// Order is observable: replace happens in place and removal shifts later
/// elements down, exactly as on the authenticator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LargeBlobArray {
    elements: Vec<Vec<u8>>,
}

impl LargeBlobArray {
    /// Create an empty array
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True iff the array has no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Parse a serialized array received from the authenticator
    ///
    /// A body too short to carry a trailer, a trailer mismatch, or a body
    /// that is not a well-formed definite CBOR array all yield the empty
    /// array: that is how a freshly provisioned or corrupted store presents,
    /// and the next write repairs it.
    pub fn parse(data: &[u8]) -> Self {
        match Self::try_parse(data) {
            Some(elements) => Self { elements },
            None => {
                debug!("large-blob array invalid ({} bytes), treating as empty", data.len());
                Self::default()
            }
        }
    }

    fn try_parse(data: &[u8]) -> Option<Vec<Vec<u8>>> {
        if data.len() <= DIGEST_LENGTH {
            return None;
        }
        let (body, trailer) = data.split_at(data.len() - DIGEST_LENGTH);
        let dgst = wire_digest(body);
        if !bool::from(dgst.as_slice().ct_eq(trailer)) {
            return None;
        }

        let mut d = Decoder::new(body);
        let count = d.array_header().ok()?;
        let mut elements = Vec::new();
        for _ in 0..count {
            let start = d.position();
            d.skip().ok()?;
            elements.push(body[start..d.position()].to_vec());
        }
        if !d.is_exhausted() {
            return None;
        }
        Some(elements)
    }

    /// Serialize to the CBOR body (without the trailer)
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        cbor::write_array_header(&mut out, self.elements.len())?;
        for element in &self.elements {
            out.extend_from_slice(element);
        }
        Ok(out)
    }

    /// Trial-decrypt every element, returning the first match
    ///
    /// Yields the element index, the deflated plaintext and the recorded
    /// original size. Elements that fail to decode or to authenticate are
    /// skipped silently.
    fn open_any(&self, key: &[u8; 32]) -> Option<(usize, Zeroizing<Vec<u8>>, usize)> {
        for (index, raw) in self.elements.iter().enumerate() {
            let Ok(entry) = LargeBlobEntry::decode(raw) else {
                continue;
            };
            if let Ok(deflated) = entry.open(key) {
                return Some((index, deflated, entry.orig_size));
            }
        }
        None
    }

    /// Index of the entry sealed under `key`, if any
    pub fn position(&self, key: &[u8; 32]) -> Option<usize> {
        self.open_any(key).map(|(index, _, _)| index)
    }

    /// Plaintext of the entry sealed under `key`, if any
    ///
    /// Inflation to the recorded original size happens here; a matching
    /// entry whose compressed payload cannot inflate is an error.
    pub fn find(&self, key: &[u8; 32]) -> Result<Option<Blob>> {
        match self.open_any(key) {
            Some((_, deflated, orig_size)) => {
                let plaintext = compress::inflate(&deflated, orig_size)?;
                Ok(Some(Blob::from(plaintext)))
            }
            None => Ok(None),
        }
    }

    /// Insert an encoded entry for `key`: replace in place if `key` already
    /// has an entry, append otherwise
    pub fn insert(&mut self, key: &[u8; 32], encoded: Vec<u8>) {
        match self.position(key) {
            Some(index) => self.elements[index] = encoded,
            None => self.elements.push(encoded),
        }
    }

    /// Drop the entry sealed under `key`
    ///
    /// Removing an absent key succeeds and leaves the array unchanged.
    pub fn remove(&mut self, key: &[u8; 32]) -> bool {
        match self.position(key) {
            Some(index) => {
                self.elements.remove(index);
                true
            }
            None => false,
        }
    }

    /// Keep only elements decryptable under one of `keys`
    ///
    /// Elements that fail to decode are kept: CTAP requires unknown
    /// conformant or non-conformant blobs to survive a trim.
    pub fn retain_decryptable(&mut self, keys: &[impl AsRef<[u8]>]) {
        self.elements.retain(|raw| {
            let Ok(entry) = LargeBlobEntry::decode(raw) else {
                return true;
            };
            keys.iter().any(|key| {
                <&[u8; 32]>::try_from(key.as_ref())
                    .is_ok_and(|key| entry.open(key).is_ok())
            })
        });
    }
}
