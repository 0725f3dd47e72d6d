#![warn(unused_extern_crates)]

//! # fido2-largeblob
//!
//! Client for the CTAP 2.1 large-blob store of FIDO2 authenticators.
//!
//! The large-blob array is a single authenticator-side byte string: a CBOR
//! array of per-credential encrypted entries plus a 16-byte integrity
//! trailer. This crate reads it in fragments, verifies it, looks entries up
//! by trial decryption under a 32-byte per-credential key, and writes
//! modified arrays back chunk by chunk under a PIN/UV auth token.
//!
//! ## Architecture
//!
//! - **Client**: the public operations — get, put, remove, trim
//! - **Device**: trait over the blocking authenticator transport
//! - **Array/Entry**: parsing, sealing and lookup of the stored data
//! - **Transfer**: the staged fragment protocol, read and write
//! - **PIN/UV**: token acquisition scoping writes and enumeration
//!
//! ## Example
//!
//! ```no_run
//! use fido2_largeblob::{Client, Device};
//!
//! fn store<D: Device>(dev: &mut D, key: &[u8; 32]) -> fido2_largeblob::Result<()> {
//!     Client::put(dev, key, b"per-credential data", Some("1234"))?;
//!     let blob = Client::get(dev, key)?;
//!     assert_eq!(blob.as_slice(), b"per-credential data");
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod blob;
pub mod cbor;
pub mod client;
pub mod device;
pub mod entry;
pub mod error;
pub mod pin;

mod credman;
mod transfer;

// Re-export main types at root level for convenience
pub use array::LargeBlobArray;
pub use blob::Blob;
pub use client::{Client, KEY_LENGTH};
pub use device::{CMD_LARGE_BLOBS, Device, MAX_CBOR_MESSAGE, NO_TIMEOUT};
pub use entry::LargeBlobEntry;
pub use error::{Error, Result};
pub use pin::Permission;

pub use fido2_largeblob_crypto::PinUvAuthProtocol;
