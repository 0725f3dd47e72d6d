//! Staged fragment transfer of the serialized large-blob array
//!
//! The array moves between client and authenticator in fragments bounded by
//! the device-advertised message size, one request in flight at a time.
//!
//! Reads walk forward from offset zero until the device returns a fragment
//! shorter than the limit; that short (possibly empty) fragment is the last.
//! Writes split the body into chunks, stream a SHA-256 over it, and send the
//! 16-byte truncation digest as the final chunk. When a PIN/UV auth token is
//! held, every chunk carries a MAC over a fixed 70-byte input binding the
//! command, the offset and the chunk digest.

use crate::array::{DIGEST_LENGTH, LargeBlobArray};
use crate::blob::Blob;
use crate::cbor::{self, MapBuilder, Value};
use crate::device::{self, CMD_LARGE_BLOBS, Device, max_fragment_length};
use crate::error::{Error, Result};
use crate::pin::{self, Permission, UvToken};

use log::debug;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Length of the per-chunk MAC input:
/// 32 bytes of 0xFF, command id, 0x00, LE32 offset, SHA-256 of the chunk
const MAC_INPUT_LENGTH: usize = 70;

/// Fetch and parse the authenticator's large-blob array
pub(crate) fn read_array<D: Device + ?Sized>(
    dev: &mut D,
    timeout_ms: i32,
) -> Result<LargeBlobArray> {
    let maxlen = max_fragment_length(dev)?;
    let mut wire = Blob::new();

    // A fragment shorter than the limit ends the transfer; one of exactly
    // the limit forces another round trip.
    let mut last = maxlen;
    while last == maxlen {
        let fragment = get_fragment(dev, wire.len(), maxlen, timeout_ms)?;
        if fragment.len() > maxlen {
            debug!(
                "read_array: device returned {} bytes for a {} byte request",
                fragment.len(),
                maxlen
            );
            return Err(Error::Rx);
        }
        last = fragment.len();
        wire.append(&fragment);
    }

    Ok(LargeBlobArray::parse(wire.as_slice()))
}

/// Serialize, authorize and write `array` back to the authenticator
pub(crate) fn write_array<D: Device + ?Sized>(
    dev: &mut D,
    array: &LargeBlobArray,
    pin: Option<&str>,
    timeout_ms: i32,
) -> Result<()> {
    let maxlen = max_fragment_length(dev)?;
    let body = array.to_cbor()?;
    let total = body.len() + DIGEST_LENGTH;

    // At most one token per write operation.
    let token = if pin::can_get_uv_token(dev, pin) {
        Some(pin::get_uv_token(
            dev,
            Permission::LargeBlobWrite,
            pin,
            timeout_ms,
        )?)
    } else {
        None
    };

    let mut hasher = Sha256::new();
    let mut offset = 0usize;
    while offset < body.len() {
        let len = maxlen.min(body.len() - offset);
        let chunk = &body[offset..offset + len];
        hasher.update(chunk);
        set_fragment(dev, token.as_ref(), chunk, offset, total, timeout_ms)?;
        offset += len;
    }

    let digest = hasher.finalize();
    set_fragment(
        dev,
        token.as_ref(),
        &digest[..DIGEST_LENGTH],
        offset,
        total,
        timeout_ms,
    )
}

/// Request `count` bytes of the serialized array starting at `offset`
fn get_fragment<D: Device + ?Sized>(
    dev: &mut D,
    offset: usize,
    count: usize,
    timeout_ms: i32,
) -> Result<Vec<u8>> {
    let request = MapBuilder::new()
        .insert(1, count as u64)?
        .insert(3, offset as u64)?
        .build()?;

    let reply = device::transact(dev, CMD_LARGE_BLOBS, &request, timeout_ms)?;
    let value: Value = cbor::decode(&reply)?;

    // Key 1 holds the fragment; its absence reads as an empty (final)
    // fragment. Other keys are ignored.
    match cbor::map_value(&value, 1) {
        Some(fragment) => cbor::value_bytes(fragment)
            .map(|bytes| bytes.to_vec())
            .ok_or(Error::Rx),
        None => Ok(Vec::new()),
    }
}

/// Send one write chunk and await its status reply
fn set_fragment<D: Device + ?Sized>(
    dev: &mut D,
    token: Option<&UvToken>,
    chunk: &[u8],
    offset: usize,
    total: usize,
    timeout_ms: i32,
) -> Result<()> {
    let mut builder = MapBuilder::new()
        .insert_bytes(1, chunk)?
        .insert(2, offset as u64)?;

    // Total length travels only on the first chunk.
    if offset == 0 {
        builder = builder.insert(3, total as u64)?;
    }

    if let Some(token) = token {
        let mac_input = write_mac_input(offset, chunk)?;
        builder = builder
            .insert_bytes(4, &token.authenticate(mac_input.as_slice()))?
            .insert(5, token.protocol().id())?;
    }

    let request = builder.build()?;
    device::transact(dev, CMD_LARGE_BLOBS, &request, timeout_ms)?;
    Ok(())
}

/// Build the 70-byte MAC input authorizing one write chunk
fn write_mac_input(offset: usize, chunk: &[u8]) -> Result<Zeroizing<[u8; MAC_INPUT_LENGTH]>> {
    if chunk.is_empty() {
        return Err(Error::InvalidArgument);
    }
    let offset = u32::try_from(offset).map_err(|_| {
        debug!("write_mac_input: offset {} exceeds u32", offset);
        Error::InvalidArgument
    })?;

    let mut buf = Zeroizing::new([0u8; MAC_INPUT_LENGTH]);
    buf[..32].fill(0xff);
    buf[32] = CMD_LARGE_BLOBS;
    buf[33] = 0x00;
    buf[34..38].copy_from_slice(&offset.to_le_bytes());
    buf[38..].copy_from_slice(&Sha256::digest(chunk));
    Ok(buf)
}
