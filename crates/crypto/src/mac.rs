//! HMAC-SHA256 over ciphertext (Encrypt-then-MAC).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::symmetric::{SymmetricKey, MAC_KEY_INFO};

type HmacSha256 = Hmac<Sha256>;

/// Fixed output length of HMAC-SHA256 in bytes.
pub const MAC_LEN: usize = 32;

/// Compute the tag over `data` under the MAC subkey of `key`.
pub fn mac(key: &SymmetricKey, data: &[u8]) -> Result<[u8; MAC_LEN], CryptoError> {
    let mac_key = key.subkey(MAC_KEY_INFO)?;
    let mut mac = HmacSha256::new_from_slice(mac_key.as_ref())
        .map_err(|e| CryptoError::InvalidKey(format!("HMAC-SHA256 key init failed: {e}")))?;
    mac.update(data);

    let mut output = [0u8; MAC_LEN];
    output.copy_from_slice(&mac.finalize().into_bytes());
    Ok(output)
}

/// Verify a tag in constant time.
pub fn mac_verify(key: &SymmetricKey, data: &[u8], tag: &[u8]) -> bool {
    let Ok(mac_key) = key.subkey(MAC_KEY_INFO) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(mac_key.as_ref()) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
