//! Re-keying of `CONTENT` envelopes between two registered clients.
//!
//! The sender's payload is verified and decrypted under the sender's session
//! key, then re-encrypted, re-MACed and signed by the relay under the
//! recipient's session key. Nothing is forwarded unless every check passes.

use relaychat_crypto::{open_content, seal_content, unwrap_symmetric_key, PublicKey, SealedContent, SymmetricKey};
use relaychat_shared::envelope::{Content, Envelope};
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::Uid;

use crate::state::RelayState;

/// Verify `msg` and produce the envelope to deliver to its recipient.
pub fn reseal(state: &RelayState, msg: &Content) -> Result<Content, RelayError> {
    for uid in [&msg.uid, &msg.destination_uid] {
        if !state.store.is_registered(uid) {
            return Err(RelayError::NotRegistered {
                uid: uid.to_string(),
            });
        }
    }

    let (sender_key, sender_public) = session_key(state, &msg.uid)?;
    let sealed = SealedContent {
        content: msg.content.clone(),
        mac: msg.mac.clone(),
        signature: msg.signature.clone(),
    };
    let plaintext = open_content(&sender_key, Some(&sender_public), &sealed)?;

    let (recipient_key, _) = session_key(state, &msg.destination_uid)?;
    let resealed = seal_content(&recipient_key, &state.keys, &plaintext)?;

    Ok(Content {
        uid: msg.uid.clone(),
        destination_uid: msg.destination_uid.clone(),
        content: resealed.content,
        mac: resealed.mac,
        signature: resealed.signature,
    })
}

/// Reseal `msg` and hand it to the recipient's connection.
pub fn relay_content(state: &RelayState, msg: &Content) -> Result<(), RelayError> {
    let forwarded = reseal(state, msg)?;
    state
        .connections
        .send(&msg.destination_uid, Envelope::Content(forwarded))?;

    tracing::debug!(
        uid = %msg.uid,
        destination_uid = %msg.destination_uid,
        "content relayed"
    );
    Ok(())
}

/// Unwrap the stored session key for `uid` with the relay's private key.
fn session_key(state: &RelayState, uid: &Uid) -> Result<(SymmetricKey, PublicKey), RelayError> {
    let row = state
        .store
        .user_keys
        .find_by_uid(uid)
        .ok_or_else(|| RelayError::NotRegistered {
            uid: uid.to_string(),
        })?;
    let wrapped = row
        .wrapped_symmetric_key
        .ok_or_else(|| RelayError::NotRegistered {
            uid: uid.to_string(),
        })?;

    let key = unwrap_symmetric_key(&state.keys, &wrapped)?;
    let public_key = PublicKey::from_base64(&row.public_key)?;
    Ok((key, public_key))
}
