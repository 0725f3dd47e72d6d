//! Error types for large-blob operations

use std::fmt;

use fido2_largeblob_crypto::CryptoError;

/// CTAP status byte for `CTAP2_ERR_PIN_REQUIRED`
const CTAP_PIN_REQUIRED: u8 = 0x36;

/// Error type for large-blob operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A caller-supplied argument was rejected (key length, empty plaintext,
    /// unusable fragment size, offset overflow)
    InvalidArgument,
    /// An internal primitive failed (CBOR build, hash, cipher, key agreement)
    Internal,
    /// Transport send failure
    Tx,
    /// Transport receive failure or malformed reply
    Rx,
    /// No array entry decrypts under the provided key
    NotFound,
    /// The authenticator requires PIN/UV authorization for this operation
    PinRequired,
    /// Any other authenticator-reported status byte
    Ctap(u8),
}

impl Error {
    /// Map a CTAP status byte from a reply to an error
    ///
    /// Only call for non-zero status bytes.
    pub(crate) fn from_status(status: u8) -> Self {
        match status {
            CTAP_PIN_REQUIRED => Error::PinRequired,
            code => Error::Ctap(code),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::Internal => write!(f, "Internal error"),
            Error::Tx => write!(f, "Transport send failed"),
            Error::Rx => write!(f, "Transport receive failed"),
            Error::NotFound => write!(f, "No matching large-blob entry"),
            Error::PinRequired => write!(f, "PIN/UV authorization required"),
            Error::Ctap(code) => write!(f, "CTAP error: 0x{:02X}", code),
        }
    }
}

impl std::error::Error for Error {}

impl From<CryptoError> for Error {
    fn from(_: CryptoError) -> Self {
        Error::Internal
    }
}

/// Result type alias for large-blob operations
pub type Result<T> = std::result::Result<T, Error>;
