//! Symmetric session keys and AES-256-GCM payload encryption.
//!
//! A session key is 32 random bytes. Independent subkeys for encryption and
//! for the HMAC are derived from it with HKDF-SHA256, so the same key never
//! feeds both primitives directly.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32; // 256-bit key
pub(crate) const NONCE_SIZE: usize = 12; // 96-bit nonce for AES-256-GCM
const TAG_SIZE: usize = 16;

const ENCRYPTION_KEY_INFO: &[u8] = b"relaychat-content-encryption-v1";
pub(crate) const MAC_KEY_INFO: &[u8] = b"relaychat-content-mac-v1";

/// A 32-byte session key that is securely zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SymmetricKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_SIZE}-byte symmetric key, got {} bytes",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub(crate) fn subkey(&self, info: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(info, out.as_mut())
            .map_err(|e| CryptoError::InvalidKey(format!("subkey derivation failed: {e}")))?;
        Ok(out)
    }
}

/// Generate a random session key.
pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    SymmetricKey { key }
}

/// Encrypt with a fresh random nonce.
///
/// Output layout: `nonce (12 bytes) || ciphertext || auth tag (16 bytes)`.
pub fn symmetric_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let enc_key = key.subkey(ENCRYPTION_KEY_INFO)?;
    let cipher = Aes256Gcm::new_from_slice(enc_key.as_ref())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    data.extend_from_slice(&nonce_bytes);
    data.extend_from_slice(&ciphertext);
    Ok(data)
}

/// Decrypt data produced by [`symmetric_encrypt`].
pub fn symmetric_decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(
            "ciphertext too short to contain nonce and tag".into(),
        ));
    }

    let (nonce_bytes, ciphertext_with_tag) = data.split_at(NONCE_SIZE);
    let enc_key = key.subkey(ENCRYPTION_KEY_INFO)?;
    let cipher = Aes256Gcm::new_from_slice(enc_key.as_ref())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_with_tag)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}
