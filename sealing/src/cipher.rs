//! AES-256-GCM sealing for backup artifacts.
//!
//! Every artifact gets a fresh random nonce; the authentication tag is
//! split off the ciphertext so the record store can persist nonce and tag
//! alongside the record metadata.

use aes_gcm::{
    Aes256Gcm, KeyInit,
    aead::{Aead, generic_array::GenericArray},
};
use rand::RngCore;

use crate::error::{SealError, SealResult};

/// Required symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Algorithm identifier persisted on sealed backup records.
pub const CIPHER_ALGORITHM: &str = "aes-256-gcm";

/// Ciphertext with its per-artifact nonce and authentication tag split out.
#[derive(Debug, Clone)]
pub struct SealedArtifact {
    /// Ciphertext without the trailing tag
    pub ciphertext: Vec<u8>,
    /// Nonce used for this artifact
    pub nonce: [u8; NONCE_LEN],
    /// GCM authentication tag
    pub tag: [u8; TAG_LEN],
}

fn check_key(key: &[u8]) -> SealResult<()> {
    if key.len() != KEY_LEN {
        return Err(SealError::InvalidKeySize {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8], plaintext: &[u8]) -> SealResult<SealedArtifact> {
    check_key(key)?;
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::from_slice(&nonce_bytes);

    let mut combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SealError::EncryptionFailed(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    if combined.len() < TAG_LEN {
        return Err(SealError::EncryptionFailed(
            "ciphertext shorter than authentication tag".to_string(),
        ));
    }
    let tag_bytes = combined.split_off(combined.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);

    Ok(SealedArtifact {
        ciphertext: combined,
        nonce: nonce_bytes,
        tag,
    })
}

/// Decrypt a sealed artifact, authenticating ciphertext, nonce and tag.
pub fn open(key: &[u8], sealed: &SealedArtifact) -> SealResult<Vec<u8>> {
    check_key(key)?;
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(GenericArray::from_slice(&sealed.nonce), combined.as_slice())
        .map_err(|e| SealError::DecryptionFailed(e.to_string()))
}

/// Rebuild a [`SealedArtifact`] from persisted ciphertext and hex-encoded
/// nonce/tag as stored on a backup record.
pub fn sealed_from_parts(
    ciphertext: Vec<u8>,
    nonce_hex: &str,
    tag_hex: &str,
) -> SealResult<SealedArtifact> {
    let nonce_bytes = hex::decode(nonce_hex)
        .map_err(|e| SealError::InvalidSealedData(format!("bad nonce encoding: {e}")))?;
    let tag_bytes = hex::decode(tag_hex)
        .map_err(|e| SealError::InvalidSealedData(format!("bad tag encoding: {e}")))?;

    let nonce: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| SealError::InvalidSealedData("nonce must be 12 bytes".to_string()))?;
    let tag: [u8; TAG_LEN] = tag_bytes
        .try_into()
        .map_err(|_| SealError::InvalidSealedData("tag must be 16 bytes".to_string()))?;

    Ok(SealedArtifact {
        ciphertext,
        nonce,
        tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [7u8; KEY_LEN];
        let plaintext = b"INSERT INTO students VALUES (1, 'Ada');";

        let sealed = seal(&key, plaintext).unwrap();
        assert_ne!(sealed.ciphertext, plaintext.to_vec());

        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext.to_vec());
    }

    #[test]
    fn unique_nonce_per_artifact() {
        let key = [7u8; KEY_LEN];
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn rejects_short_key() {
        let err = seal(&[0u8; 16], b"x").unwrap_err();
        assert!(matches!(
            err,
            SealError::InvalidKeySize {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn tampered_tag_fails_open() {
        let key = [7u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload").unwrap();
        sealed.tag[0] ^= 0xff;
        assert!(matches!(
            open(&key, &sealed),
            Err(SealError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let key = [7u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload payload payload").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            open(&key, &sealed),
            Err(SealError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn wrong_key_fails_open() {
        let sealed = seal(&[7u8; KEY_LEN], b"payload").unwrap();
        assert!(open(&[8u8; KEY_LEN], &sealed).is_err());
    }

    #[test]
    fn parts_roundtrip() {
        let key = [9u8; KEY_LEN];
        let sealed = seal(&key, b"body").unwrap();
        let rebuilt = sealed_from_parts(
            sealed.ciphertext.clone(),
            &hex::encode(sealed.nonce),
            &hex::encode(sealed.tag),
        )
        .unwrap();
        assert_eq!(open(&key, &rebuilt).unwrap(), b"body".to_vec());
    }
}
