//! Ed25519 signatures.

use ed25519_dalek::{Signature, Signer, Verifier};

use crate::keypair::{KeyPair, PublicKey};

pub const SIGNATURE_LEN: usize = 64;

/// Sign `data` with the keypair's signing key.
pub fn sign(keypair: &KeyPair, data: &[u8]) -> Vec<u8> {
    keypair.signing_key().sign(data).to_bytes().to_vec()
}

/// Verify a signature produced by [`sign`].
pub fn verify(public_key: &PublicKey, data: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    public_key.verifying().verify(data, &signature).is_ok()
}
