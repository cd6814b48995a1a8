//! Error kinds for the backup engine.
//!
//! Validation, access, integrity, signature and unsafe-content failures are
//! terminal: they are surfaced immediately and never retried. External tool
//! failures are recorded on the backup record; scheduled sweeps log them per
//! tenant without halting.

use campus_sealing::SealError;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Unsafe content: {0}")]
    UnsafeContent(String),
    #[error("External tool error: {0}")]
    ExternalTool(String),
    #[error("Dependency error: {0}")]
    Dependency(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Stable kind token used in audit payloads and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Validation(_) => "validation",
            BackupError::AccessDenied(_) => "access_denied",
            BackupError::NotFound(_) => "not_found",
            BackupError::Integrity(_) => "integrity",
            BackupError::Signature(_) => "signature",
            BackupError::UnsafeContent(_) => "unsafe_content",
            BackupError::ExternalTool(_) => "external_tool",
            BackupError::Dependency(_) => "dependency",
            BackupError::Database(_) => "database",
            BackupError::Io(_) => "io",
            BackupError::Serialization(_) => "serialization",
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

impl From<SealError> for BackupError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::VerificationFailed(msg) => BackupError::Signature(msg),
            SealError::DecryptionFailed(msg) | SealError::InvalidSealedData(msg) => {
                BackupError::Integrity(msg)
            }
            SealError::EncryptionFailed(msg)
            | SealError::SigningFailed(msg)
            | SealError::InvalidKey(msg) => BackupError::Dependency(msg),
            SealError::InvalidKeySize { expected, actual } => BackupError::Dependency(format!(
                "invalid encryption key size: expected {}, got {}",
                expected, actual
            )),
            SealError::Io(e) => BackupError::Io(e),
        }
    }
}
