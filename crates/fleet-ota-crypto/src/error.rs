//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The signature does not match the signed content
    #[error("Invalid signature")]
    InvalidSignature,

    /// The signature string could not be decoded
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Signing could not be performed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Key format error
    #[error("Key format error: {0}")]
    KeyFormatError(String),

    /// I/O error while reading or writing key material
    #[error("Key file I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid key length
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid signature length
    #[error("Invalid signature length: expected {expected} bytes, got {actual}")]
    InvalidSignatureLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

impl CryptoError {
    /// Whether this error means "the content or signature was not authentic"
    /// as opposed to "the crypto machinery could not run".
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidSignature
                | CryptoError::MalformedSignature(_)
                | CryptoError::InvalidSignatureLength { .. }
        )
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::KeyFormatError(format!("Base64 decode error: {}", e))
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
