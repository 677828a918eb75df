//! Sealing and opening of chat payloads as carried by `CONTENT` envelopes.
//!
//! Sealing is encrypt → MAC over the ciphertext → sign the MAC. Opening checks
//! the MAC (and the signature, when a signer is given) before decrypting, so
//! unverified ciphertext is never decrypted.

use crate::encoding::{from_base64, to_base64};
use crate::error::CryptoError;
use crate::keypair::{KeyPair, PublicKey};
use crate::mac::{mac, mac_verify};
use crate::signing::{sign, verify};
use crate::symmetric::{symmetric_decrypt, symmetric_encrypt, SymmetricKey};

/// Base64 wire form of a sealed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedContent {
    pub content: String,
    pub mac: String,
    pub signature: String,
}

/// Encrypt `plaintext` under `key`, MAC the ciphertext and sign the MAC.
pub fn seal_content(
    key: &SymmetricKey,
    signer: &KeyPair,
    plaintext: &[u8],
) -> Result<SealedContent, CryptoError> {
    let ciphertext = symmetric_encrypt(key, plaintext)?;
    let tag = mac(key, &ciphertext)?;
    let signature = sign(signer, &tag);
    Ok(SealedContent {
        content: to_base64(&ciphertext),
        mac: to_base64(&tag),
        signature: to_base64(&signature),
    })
}

/// Verify and decrypt a sealed payload.
///
/// The signature is checked only when `signer` is provided.
pub fn open_content(
    key: &SymmetricKey,
    signer: Option<&PublicKey>,
    sealed: &SealedContent,
) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = from_base64(&sealed.content)?;
    let tag = from_base64(&sealed.mac)?;

    if !mac_verify(key, &ciphertext, &tag) {
        tracing::debug!(ciphertext_len = ciphertext.len(), "content MAC mismatch");
        return Err(CryptoError::MacMismatch);
    }

    if let Some(public_key) = signer {
        let signature = from_base64(&sealed.signature)?;
        if !verify(public_key, &tag, &signature) {
            tracing::debug!(signature_len = signature.len(), "content signature rejected");
            return Err(CryptoError::SignatureInvalid);
        }
    }

    symmetric_decrypt(key, &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::generate_asymmetric_keypair;
    use crate::symmetric::generate_symmetric_key;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_symmetric_key();
        let signer = generate_asymmetric_keypair();
        let sealed = seal_content(&key, &signer, b"hi").unwrap();
        let plaintext = open_content(&key, Some(&signer.public_key()), &sealed).unwrap();
        assert_eq!(plaintext, b"hi");
    }

    #[test]
    fn open_without_signer_skips_signature() {
        let key = generate_symmetric_key();
        let signer = generate_asymmetric_keypair();
        let mut sealed = seal_content(&key, &signer, b"hi").unwrap();
        sealed.signature = String::new();
        assert_eq!(open_content(&key, None, &sealed).unwrap(), b"hi");
    }

    #[test]
    fn tampered_content_fails_mac() {
        let key = generate_symmetric_key();
        let signer = generate_asymmetric_keypair();
        let mut sealed = seal_content(&key, &signer, b"hi").unwrap();
        let mut ciphertext = from_base64(&sealed.content).unwrap();
        ciphertext[0] ^= 0xFF;
        sealed.content = to_base64(&ciphertext);

        let result = open_content(&key, Some(&signer.public_key()), &sealed);
        assert!(matches!(result, Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn wrong_signer_fails_signature() {
        let key = generate_symmetric_key();
        let signer = generate_asymmetric_keypair();
        let impostor = generate_asymmetric_keypair();
        let sealed = seal_content(&key, &signer, b"hi").unwrap();

        let result = open_content(&key, Some(&impostor.public_key()), &sealed);
        assert!(matches!(result, Err(CryptoError::SignatureInvalid)));
    }

    #[test]
    fn wrong_key_fails_mac() {
        let signer = generate_asymmetric_keypair();
        let sealed = seal_content(&generate_symmetric_key(), &signer, b"hi").unwrap();
        let result = open_content(&generate_symmetric_key(), None, &sealed);
        assert!(matches!(result, Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn non_base64_content_is_encoding_error() {
        let key = generate_symmetric_key();
        let sealed = SealedContent {
            content: "***".into(),
            mac: String::new(),
            signature: String::new(),
        };
        let result = open_content(&key, None, &sealed);
        assert!(matches!(result, Err(CryptoError::Encoding(_))));
    }
}
