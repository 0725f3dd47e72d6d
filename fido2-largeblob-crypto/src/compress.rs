//! Raw DEFLATE compression (RFC 1951)
//!
//! Large-blob plaintexts are deflated before sealing. The entry records the
//! original size, so inflation is bounded: the decompressor must yield
//! exactly that many bytes and consume the whole stream.

use crate::error::{CryptoError, Result};

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

/// Worst-case deflate output size for `len` input bytes
///
/// Mirrors zlib's `compressBound`: stored blocks add 5 bytes of overhead per
/// 16 KiB plus a small constant.
pub fn deflate_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}

/// Compress `data` with raw DEFLATE
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(deflate_bound(data.len())),
        Compression::default(),
    );
    encoder
        .write_all(data)
        .map_err(|_| CryptoError::CompressionFailed)?;
    let out = encoder.finish().map_err(|_| CryptoError::CompressionFailed)?;
    if out.len() > deflate_bound(data.len()) {
        return Err(CryptoError::CompressionFailed);
    }
    Ok(out)
}

/// Decompress `data`, which must inflate to exactly `original_len` bytes
///
/// Truncated streams, streams that keep producing output past
/// `original_len`, and streams with trailing input are all rejected.
pub fn inflate(data: &[u8], original_len: usize) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = vec![0u8; original_len];
    decoder
        .read_exact(&mut out)
        .map_err(|_| CryptoError::DecompressionFailed)?;

    // The stream must end exactly at original_len output bytes.
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(0) => {}
        _ => return Err(CryptoError::DecompressionFailed),
    }
    if (decoder.total_in() as usize) != data.len() {
        return Err(CryptoError::DecompressionFailed);
    }

    Ok(out)
}
