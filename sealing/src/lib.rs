//! Artifact sealing for campus backups.
//!
//! The sealing pipeline applied to every exported artifact is
//! encrypt → persist → hash → sign:
//!
//! - [`cipher`] — AES-256-GCM authenticated encryption with per-artifact
//!   nonces and a split authentication tag
//! - [`digest`] — SHA-256 content digests, computed from persisted bytes
//! - [`signing`] — ECDSA P-256 signatures over the digest

pub mod cipher;
pub mod digest;
pub mod error;
pub mod signing;

pub use cipher::{CIPHER_ALGORITHM, SealedArtifact, open, seal, sealed_from_parts};
pub use digest::{file_sha256_hex, sha256_hex};
pub use error::{SealError, SealResult};
pub use signing::{ArtifactSigner, ArtifactVerifier, SIGNATURE_ALGORITHM};
