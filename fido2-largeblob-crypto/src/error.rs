//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid public key provided
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Encryption failed
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Decryption or authentication failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Compression failed
    #[error("Compression failed")]
    CompressionFailed,

    /// Decompressed data did not match the declared original size
    #[error("Decompression failed")]
    DecompressionFailed,
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;
