//! Owned byte buffer with zeroization
//!
//! `Blob` carries plaintexts, fragment accumulators and other transient byte
//! strings through the subsystem. The backing storage is zeroized on `reset`
//! and on drop, since blobs routinely hold decrypted credential data.

use std::fmt;

use zeroize::Zeroize;

/// Owned, length-tracked byte container
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Blob {
    buf: Vec<u8>,
}

impl Blob {
    /// Create an empty blob
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a blob holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Self { buf: data.to_vec() }
    }

    /// Replace the contents with a copy of `data`
    ///
    /// The previous contents are zeroized before release.
    pub fn set(&mut self, data: &[u8]) {
        self.buf.zeroize();
        self.buf.clear();
        self.buf.extend_from_slice(data);
    }

    /// Append a copy of `data`
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// View the contents
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True iff the blob holds no bytes
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Zeroize and release the backing storage
    pub fn reset(&mut self) {
        self.buf.zeroize();
        self.buf = Vec::new();
    }

    /// Consume the blob, returning the raw bytes
    ///
    /// The returned vector is no longer zeroized on drop.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Vec<u8>> for Blob {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

// Debug without revealing contents
impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.buf.len())
            .field("data", &"<redacted>")
            .finish()
    }
}
