//! Base64 (standard alphabet) for every binary value that crosses the wire.

use base64::Engine;

use crate::error::CryptoError;

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}
