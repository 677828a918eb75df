//! Long-term asymmetric keypairs.
//!
//! A keypair is an X25519 key-exchange secret (used to wrap symmetric keys)
//! plus an Ed25519 signing key. The public half travels as a single 64-byte
//! bundle `x25519_public || ed25519_verifying`, base64 encoded.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding::{from_base64, to_base64};
use crate::error::CryptoError;

/// Length of a serialized public key bundle.
pub const PUBLIC_KEY_BUNDLE_LEN: usize = 64;

/// Private keypair. Secrets are wiped on drop by the underlying dalek types.
pub struct KeyPair {
    exchange: StaticSecret,
    signing: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key().to_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            exchange: ExchangePublicKey::from(&self.exchange),
            verifying: self.signing.verifying_key(),
        }
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

/// Generate a fresh keypair from the OS-seeded thread RNG.
pub fn generate_asymmetric_keypair() -> KeyPair {
    let mut exchange_bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(exchange_bytes.as_mut());
    let mut signing_bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(signing_bytes.as_mut());

    KeyPair {
        exchange: StaticSecret::from(*exchange_bytes),
        signing: SigningKey::from_bytes(&signing_bytes),
    }
}

/// Public half of a [`KeyPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    exchange: ExchangePublicKey,
    verifying: VerifyingKey,
}

impl PublicKey {
    pub(crate) fn exchange(&self) -> &ExchangePublicKey {
        &self.exchange
    }

    pub(crate) fn verifying(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_BUNDLE_LEN] {
        let mut out = [0u8; PUBLIC_KEY_BUNDLE_LEN];
        out[..32].copy_from_slice(self.exchange.as_bytes());
        out[32..].copy_from_slice(self.verifying.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_BUNDLE_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {PUBLIC_KEY_BUNDLE_LEN}-byte public key bundle, got {} bytes",
                bytes.len()
            )));
        }
        let mut exchange = [0u8; 32];
        exchange.copy_from_slice(&bytes[..32]);
        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&bytes[32..]);

        let verifying = VerifyingKey::from_bytes(&verifying)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid signing public key: {e}")))?;
        Ok(Self {
            exchange: ExchangePublicKey::from(exchange),
            verifying,
        })
    }

    pub fn to_base64(&self) -> String {
        to_base64(&self.to_bytes())
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&from_base64(text)?)
    }
}
