//! ECIES-X25519-HKDF-AES256GCM: asymmetric encryption to a public key bundle.
//!
//! ## Algorithm
//!
//! ```text
//! Encrypt(recipient_pk, plaintext):
//!   1. eph_sk = random 32 bytes, eph_pk = X25519(eph_sk, basepoint)
//!   2. shared = X25519(eph_sk, recipient_pk)
//!   3. key = HKDF-SHA256(salt = eph_pk, ikm = shared,
//!                        info = "relaychat-key-wrap-v1" || recipient_pk)
//!   4. nonce = random 12 bytes
//!   5. ct = AES-256-GCM(key, nonce, plaintext, aad = eph_pk)
//!   6. return eph_pk || nonce || ct
//! ```
//!
//! Used to wrap a client's session key under the relay's public key.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding::{from_base64, to_base64};
use crate::error::CryptoError;
use crate::keypair::{KeyPair, PublicKey};
use crate::symmetric::{SymmetricKey, NONCE_SIZE};

const WRAP_INFO: &[u8] = b"relaychat-key-wrap-v1";
const EPH_PK_SIZE: usize = 32;
const TAG_SIZE: usize = 16;

fn derive_wrap_key(
    shared: &[u8; 32],
    eph_pk: &[u8; 32],
    recipient_pk: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(eph_pk), shared);
    let mut info = Vec::with_capacity(WRAP_INFO.len() + 32);
    info.extend_from_slice(WRAP_INFO);
    info.extend_from_slice(recipient_pk);

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, key.as_mut())
        .map_err(|e| CryptoError::InvalidKey(format!("wrap key derivation failed: {e}")))?;
    Ok(key)
}

/// Encrypt `plaintext` so only the holder of `recipient`'s keypair can read it.
pub fn asymmetric_encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut eph_bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(eph_bytes.as_mut());
    let eph_secret = StaticSecret::from(*eph_bytes);
    let eph_public = ExchangePublicKey::from(&eph_secret);

    let shared = eph_secret.diffie_hellman(recipient.exchange());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("recipient key is a low-order point".into()));
    }
    let key = derive_wrap_key(
        shared.as_bytes(),
        eph_public.as_bytes(),
        recipient.exchange().as_bytes(),
    )?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: eph_public.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(EPH_PK_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`asymmetric_encrypt`].
pub fn asymmetric_decrypt(keypair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < EPH_PK_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed("ciphertext too short".into()));
    }
    let (eph_pk_bytes, rest) = data.split_at(EPH_PK_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut eph_pk = [0u8; 32];
    eph_pk.copy_from_slice(eph_pk_bytes);
    let eph_public = ExchangePublicKey::from(eph_pk);

    let secret = keypair.exchange_secret();
    let shared = secret.diffie_hellman(&eph_public);
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed("ephemeral key is a low-order point".into()));
    }
    let recipient_pk = ExchangePublicKey::from(secret);
    let key = derive_wrap_key(shared.as_bytes(), &eph_pk, recipient_pk.as_bytes())?;

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &eph_pk,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Wrap a session key under `recipient` and base64 encode it for the wire.
pub fn wrap_symmetric_key(key: &SymmetricKey, recipient: &PublicKey) -> Result<String, CryptoError> {
    Ok(to_base64(&asymmetric_encrypt(recipient, key.as_bytes())?))
}

/// Recover a session key from its wire form.
pub fn unwrap_symmetric_key(keypair: &KeyPair, wrapped: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = Zeroizing::new(asymmetric_decrypt(keypair, &from_base64(wrapped)?)?);
    SymmetricKey::from_bytes(&bytes)
}
