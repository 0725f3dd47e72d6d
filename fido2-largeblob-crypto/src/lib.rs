//! Cryptographic primitives for the CTAP 2.1 large-blob client
//!
//! This crate provides the cryptographic operations the large-blob protocol
//! is built on:
//!
//! - **AEAD**: AES-256-GCM sealing of per-credential blob entries
//! - **Compression**: raw DEFLATE with inflation bounded to a declared size
//! - **ECDH**: P-256 key agreement for the PIN/UV subprotocol
//! - **PIN Protocols**: V1 (AES-256-CBC + HMAC) and V2 (HKDF-derived keys)
//!
//! All implementations follow the CTAP 2.1 specification:
//! <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html>

pub mod aead;
pub mod compress;
pub mod ecdh;
pub mod error;
pub mod pin_protocol;

pub use error::{CryptoError, Result};
pub use pin_protocol::PinUvAuthProtocol;
