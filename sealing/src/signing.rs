//! ECDSA P-256 signatures over artifact digests.
//!
//! The backup engine signs the hex digest string, not the artifact bytes,
//! so verification only ever needs the record metadata plus the recomputed
//! digest.

use base64::{Engine, engine::general_purpose::STANDARD};
use p256::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
};
use p256::pkcs8::DecodePrivateKey;
use zeroize::Zeroizing;

use crate::error::{SealError, SealResult};

/// Algorithm identifier persisted on signed backup records.
pub const SIGNATURE_ALGORITHM: &str = "ecdsa-p256-sha256";

/// Signs artifact digests with an ECDSA P-256 private key.
#[derive(Clone)]
pub struct ArtifactSigner {
    key: SigningKey,
}

impl ArtifactSigner {
    /// Build a signer from a raw 32-byte P-256 scalar.
    pub fn from_raw(private_key: &[u8]) -> SealResult<Self> {
        if private_key.len() != 32 {
            return Err(SealError::InvalidKey(
                "private key must be 32 bytes for P-256".to_string(),
            ));
        }
        let key_bytes = Zeroizing::new(<[u8; 32]>::try_from(private_key)
            .map_err(|_| SealError::InvalidKey("invalid P-256 private key length".to_string()))?);
        let key = SigningKey::from_bytes((&*key_bytes).into())
            .map_err(|_| SealError::InvalidKey("invalid P-256 private key bytes".to_string()))?;
        Ok(Self { key })
    }

    /// Build a signer from a PKCS8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> SealResult<Self> {
        let key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|_| SealError::InvalidKey("invalid PKCS8 PEM private key".to_string()))?;
        Ok(Self { key })
    }

    /// Sign a hex digest, returning the DER signature base64-encoded.
    pub fn sign_digest(&self, digest_hex: &str) -> String {
        let signature: Signature = self.key.sign(digest_hex.as_bytes());
        STANDARD.encode(signature.to_der())
    }

    /// Verifier for signatures produced by this signer.
    pub fn verifier(&self) -> ArtifactVerifier {
        ArtifactVerifier {
            key: VerifyingKey::from(&self.key),
        }
    }
}

impl std::fmt::Debug for ArtifactSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSigner").finish_non_exhaustive()
    }
}

/// Verifies digest signatures with the matching P-256 public key.
#[derive(Debug, Clone)]
pub struct ArtifactVerifier {
    key: VerifyingKey,
}

impl ArtifactVerifier {
    /// Verify a base64(DER) signature against a hex digest.
    pub fn verify_digest(&self, digest_hex: &str, signature_b64: &str) -> SealResult<()> {
        let der = STANDARD
            .decode(signature_b64)
            .map_err(|e| SealError::VerificationFailed(format!("bad signature encoding: {e}")))?;
        let signature = Signature::from_der(&der)
            .map_err(|e| SealError::VerificationFailed(format!("malformed signature: {e}")))?;
        self.key
            .verify(digest_hex.as_bytes(), &signature)
            .map_err(|_| {
                SealError::VerificationFailed("signature does not match digest".to_string())
            })
    }
}
