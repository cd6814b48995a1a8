//! Error types for the sealing pipeline.

use thiserror::Error;

/// Errors raised while sealing or unsealing backup artifacts.
#[derive(Debug, Error)]
pub enum SealError {
    /// Invalid symmetric key length provided
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Authenticated encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authenticated decryption failed (bad key, nonce, tag or ciphertext)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Sealed payload is structurally invalid
    #[error("Invalid sealed data: {0}")]
    InvalidSealedData(String),

    /// Signing key could not be parsed
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// Signature generation failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Signature did not verify against the digest
    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    /// Underlying IO failure while reading persisted bytes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for sealing operations.
pub type SealResult<T> = Result<T, SealError>;
