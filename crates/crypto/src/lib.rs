//! relaychat-crypto: the primitive layer behind the relay handshake.
//!
//! Provides X25519/Ed25519 keypairs, ECIES key wrapping, AES-256-GCM payload
//! encryption, HMAC-SHA256 integrity tags, Ed25519 signatures, and the
//! seal/open helpers that combine them for `CONTENT` envelopes.

pub mod asymmetric;
pub mod content;
pub mod encoding;
pub mod error;
pub mod keypair;
pub mod mac;
pub mod signing;
pub mod symmetric;

pub use asymmetric::{asymmetric_decrypt, asymmetric_encrypt, unwrap_symmetric_key, wrap_symmetric_key};
pub use content::{open_content, seal_content, SealedContent};
pub use error::CryptoError;
pub use keypair::{generate_asymmetric_keypair, KeyPair, PublicKey};
pub use mac::{mac, mac_verify};
pub use signing::{sign, verify};
pub use symmetric::{generate_symmetric_key, symmetric_decrypt, symmetric_encrypt, SymmetricKey};
