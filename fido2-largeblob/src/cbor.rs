//! CBOR encoding and decoding for the large-blob protocol
//!
//! Three layers, matching the trust level of the data:
//!
//! - **Requests** are built with [`MapBuilder`], which hand-encodes a
//!   definite-length map with small unsigned integer keys in canonical order
//!   (values are encoded through `cbor4ii`'s serde support).
//! - **Replies** from the authenticator are decoded into a dynamic [`Value`]
//!   and walked with the `map_value`/`value_*` helpers; unknown keys are
//!   ignored, as CTAP requires.
//! - **The serialized large-blob array** is untrusted peripheral data and is
//!   parsed with the strict [`Decoder`], which accepts only definite-length
//!   items and rejects negative or indefinite integers outright.

use crate::error::{Error, Result};

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub type Value = cbor4ii::core::Value;

/// Encode a value to CBOR bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    cbor4ii::serde::to_vec(Vec::new(), value).map_err(|_| Error::Internal)
}

/// Decode CBOR reply bytes to a value
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    cbor4ii::serde::from_slice(data).map_err(|_| Error::Rx)
}

/// Look up an integer key in a CBOR map value
///
/// Returns `None` when the value is not a map or the key is absent. Unknown
/// and non-integer keys are simply not matched.
pub fn map_value(value: &Value, key: u64) -> Option<&Value> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if *i == key as i128))
            .map(|(_, v)| v),
        _ => None,
    }
}

/// Extract a byte string from a CBOR value
pub fn value_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(bytes) => Some(bytes),
        _ => None,
    }
}

/// Extract an unsigned integer from a CBOR value
pub fn value_uint(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(i) if *i >= 0 => u64::try_from(*i).ok(),
        _ => None,
    }
}

/// Build a definite-length CBOR map with unsigned integer keys
///
/// CTAP request maps use keys 1..=10; entries are emitted in canonical
/// (ascending numeric) order regardless of insertion order.
pub struct MapBuilder {
    entries: Vec<(u8, Vec<u8>)>,
}

impl MapBuilder {
    /// Create a new map builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a key and a serde-encodable value
    pub fn insert<T: Serialize>(mut self, key: u8, value: T) -> Result<Self> {
        let encoded = encode(&value)?;
        self.entries.push((key, encoded));
        Ok(self)
    }

    /// Insert a byte string value
    pub fn insert_bytes(mut self, key: u8, bytes: &[u8]) -> Result<Self> {
        let encoded = encode(&serde_bytes::Bytes::new(bytes))?;
        self.entries.push((key, encoded));
        Ok(self)
    }

    /// Insert a value only if present
    pub fn insert_opt<T: Serialize>(self, key: u8, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert pre-encoded CBOR bytes as the value
    pub fn insert_raw(mut self, key: u8, raw: Vec<u8>) -> Self {
        self.entries.push((key, raw));
        self
    }

    /// Encode the map to CBOR bytes
    pub fn build(mut self) -> Result<Vec<u8>> {
        self.entries.sort_by_key(|(k, _)| *k);

        let mut out = Vec::new();
        write_type_header(&mut out, 5, self.entries.len() as u64)?;
        for (key, value) in self.entries {
            // Keys are small unsigned integers; encode by hand.
            if key <= 23 {
                out.push(key);
            } else {
                out.push(0x18);
                out.push(key);
            }
            out.extend_from_slice(&value);
        }
        Ok(out)
    }
}

impl Default for MapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a definite-length array header
pub fn write_array_header(out: &mut Vec<u8>, len: usize) -> Result<()> {
    write_type_header(out, 4, len as u64)
}

fn write_type_header(out: &mut Vec<u8>, major: u8, arg: u64) -> Result<()> {
    let tag = major << 5;
    if arg <= 23 {
        out.push(tag | arg as u8);
    } else if arg <= u8::MAX as u64 {
        out.push(tag | 24);
        out.push(arg as u8);
    } else if arg <= u16::MAX as u64 {
        out.push(tag | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u32::MAX as u64 {
        out.push(tag | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(tag | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
    Ok(())
}

/// Strict decode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended inside an item
    Truncated,
    /// Indefinite-length item
    Indefinite,
    /// Item of an unexpected major type
    UnexpectedType,
    /// Structurally invalid encoding
    Malformed,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "truncated CBOR item"),
            DecodeError::Indefinite => write!(f, "indefinite-length CBOR item"),
            DecodeError::UnexpectedType => write!(f, "unexpected CBOR type"),
            DecodeError::Malformed => write!(f, "malformed CBOR"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Maximum nesting depth accepted by [`Decoder::skip`]
const MAX_SKIP_DEPTH: u8 = 8;

/// Strict reader over untrusted CBOR bytes
///
/// Accepts only definite-length items. Used to parse the serialized
/// large-blob array, whose structure must be validated byte by byte.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True iff every input byte has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// True iff the next item is an unsigned integer
    pub fn peeks_uint(&self) -> bool {
        self.buf.get(self.pos).is_some_and(|b| b >> 5 == 0)
    }

    /// Read a definite array header, returning the element count
    pub fn array_header(&mut self) -> std::result::Result<usize, DecodeError> {
        let (major, arg) = self.head()?;
        if major != 4 {
            return Err(DecodeError::UnexpectedType);
        }
        usize::try_from(arg).map_err(|_| DecodeError::Malformed)
    }

    /// Read a definite map header, returning the pair count
    pub fn map_header(&mut self) -> std::result::Result<usize, DecodeError> {
        let (major, arg) = self.head()?;
        if major != 5 {
            return Err(DecodeError::UnexpectedType);
        }
        usize::try_from(arg).map_err(|_| DecodeError::Malformed)
    }

    /// Read an unsigned integer
    ///
    /// Negative integers and every non-integer type are rejected.
    pub fn uint(&mut self) -> std::result::Result<u64, DecodeError> {
        let (major, arg) = self.head()?;
        if major != 0 {
            return Err(DecodeError::UnexpectedType);
        }
        Ok(arg)
    }

    /// Read a definite byte string
    pub fn bytes(&mut self) -> std::result::Result<&'a [u8], DecodeError> {
        let (major, arg) = self.head()?;
        if major != 2 {
            return Err(DecodeError::UnexpectedType);
        }
        self.take(arg)
    }

    /// Skip one well-formed item of any type
    pub fn skip(&mut self) -> std::result::Result<(), DecodeError> {
        self.skip_item(MAX_SKIP_DEPTH)
    }

    fn skip_item(&mut self, depth: u8) -> std::result::Result<(), DecodeError> {
        if depth == 0 {
            return Err(DecodeError::Malformed);
        }
        let (major, arg) = self.head()?;
        match major {
            0 | 1 | 7 => Ok(()),
            2 | 3 => self.take(arg).map(|_| ()),
            4 => {
                for _ in 0..arg {
                    self.skip_item(depth - 1)?;
                }
                Ok(())
            }
            5 => {
                for _ in 0..arg {
                    self.skip_item(depth - 1)?;
                    self.skip_item(depth - 1)?;
                }
                Ok(())
            }
            6 => self.skip_item(depth - 1),
            _ => Err(DecodeError::Malformed),
        }
    }

    fn head(&mut self) -> std::result::Result<(u8, u64), DecodeError> {
        let initial = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;

        let major = initial >> 5;
        let info = initial & 0x1f;
        let arg = match info {
            0..=23 => info as u64,
            24 => self.take(1)?[0] as u64,
            25 => u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as u64,
            26 => u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as u64,
            27 => u64::from_be_bytes(self.take(8)?.try_into().unwrap()),
            31 => return Err(DecodeError::Indefinite),
            _ => return Err(DecodeError::Malformed),
        };
        Ok((major, arg))
    }

    fn take(&mut self, len: u64) -> std::result::Result<&'a [u8], DecodeError> {
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated)?;
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
