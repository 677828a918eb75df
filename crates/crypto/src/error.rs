//! Error types for the relaychat-crypto crate.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is invalid (wrong length, malformed, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, tampered ciphertext, etc.).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// A MAC did not verify under the given key.
    #[error("mac mismatch")]
    MacMismatch,

    /// A signature did not verify under the given public key.
    #[error("signature invalid")]
    SignatureInvalid,

    /// A wire value was not valid base64.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::Encoding(err.to_string())
    }
}

impl From<CryptoError> for relaychat_shared::error::RelayError {
    fn from(err: CryptoError) -> Self {
        use relaychat_shared::error::RelayError;
        match err {
            CryptoError::MacMismatch | CryptoError::SignatureInvalid => {
                RelayError::IntegrityFailure(err.to_string())
            }
            other => RelayError::Crypto(other.to_string()),
        }
    }
}
