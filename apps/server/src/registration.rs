//! Server side of the CLIENT_REGISTRATION → OTP → KEY handshake.
//!
//! Each handler takes the current time explicitly and returns the envelope to
//! send back (if any); binding and sending are left to the session.

use chrono::{DateTime, Utc};
use relaychat_crypto::encoding::from_base64;
use relaychat_crypto::PublicKey;
use relaychat_shared::envelope::{ClientRegistration, Envelope, Key, Otp};
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::Uid;

use crate::otp::otp_matches;
use crate::state::RelayState;

/// Result of handling an echoed OTP.
#[derive(Debug)]
pub enum OtpOutcome {
    /// Code accepted; the reply carries the relay's public key.
    Confirmed(Envelope),
    /// A fresh code was issued. `cause` is `OtpExpired` or `OtpMismatch`.
    Reissued { reply: Envelope, cause: RelayError },
    /// Too many wrong echoes. The unfinished rows were dropped so the uid
    /// can register again from scratch.
    Abandoned { cause: RelayError },
}

/// Create the uid's rows and issue its first OTP.
pub fn handle_registration(
    state: &RelayState,
    msg: &ClientRegistration,
    now: DateTime<Utc>,
) -> Result<Envelope, RelayError> {
    PublicKey::from_base64(&msg.public_key)?;
    state.store.register(&msg.uid, msg.public_key.clone())?;

    let otp = state.otp.issue();
    state.store.registrations.modify(&msg.uid, |row| {
        row.record_otp_issued(otp.clone(), now);
    });

    tracing::info!(uid = %msg.uid, "registration opened, otp issued");
    Ok(otp_envelope(&msg.uid, otp))
}

/// Check an echoed OTP.
///
/// Expired and wrong codes are both answered with a fresh code, until
/// `max_otp_attempts` wrong echoes abandon the registration.
pub fn handle_otp(
    state: &RelayState,
    msg: &Otp,
    now: DateTime<Utc>,
) -> Result<OtpOutcome, RelayError> {
    let window = state.config.otp_expiry()?;
    let verify_value = state.config.verify_otp_value;
    let max_attempts = state.config.max_otp_attempts;

    let result = state.store.registrations.modify(&msg.uid, |row| {
        if row.otp_confirmed {
            return Err(RelayError::ProtocolViolation(format!(
                "otp already confirmed for {}",
                msg.uid
            )));
        }
        if !row.otp_sent {
            return Err(RelayError::ProtocolViolation(format!(
                "no otp outstanding for {}",
                msg.uid
            )));
        }

        if row.otp_expired(now, window) {
            let otp = state.otp.issue();
            row.record_otp_issued(otp.clone(), now);
            return Ok(OtpOutcome::Reissued {
                reply: otp_envelope(&msg.uid, otp),
                cause: RelayError::OtpExpired {
                    uid: msg.uid.to_string(),
                },
            });
        }

        if verify_value {
            let issued = row.otp_value.as_deref().unwrap_or_default();
            if !otp_matches(issued, &msg.otp) {
                row.otp_attempts += 1;
                let cause = RelayError::OtpMismatch {
                    uid: msg.uid.to_string(),
                };
                if row.otp_attempts >= max_attempts {
                    return Ok(OtpOutcome::Abandoned { cause });
                }
                let otp = state.otp.issue();
                row.record_otp_issued(otp.clone(), now);
                return Ok(OtpOutcome::Reissued {
                    reply: otp_envelope(&msg.uid, otp),
                    cause,
                });
            }
        }

        row.otp_confirmed = true;
        row.try_complete();
        Ok(OtpOutcome::Confirmed(Envelope::Key(Key {
            uid: msg.uid.clone(),
            wrapped_key: state.keys.public_key().to_base64(),
        })))
    });

    let outcome = result.ok_or_else(|| RelayError::UnknownUid {
        uid: msg.uid.to_string(),
    })??;

    match &outcome {
        OtpOutcome::Confirmed(_) => {
            tracing::info!(uid = %msg.uid, "otp confirmed, sending relay public key");
        }
        OtpOutcome::Abandoned { .. } => {
            // Outside the row lock: `abandon` takes the registration entry itself.
            state.store.abandon(&msg.uid);
            tracing::warn!(uid = %msg.uid, attempts = max_attempts, "otp attempts exhausted, registration abandoned");
        }
        OtpOutcome::Reissued { .. } => {}
    }
    Ok(outcome)
}

/// Store the client's wrapped session key and complete registration.
///
/// The key stays wrapped; it is only unwrapped when relaying.
pub fn handle_key(state: &RelayState, msg: &Key) -> Result<(), RelayError> {
    from_base64(&msg.wrapped_key)
        .map_err(|e| RelayError::MalformedEnvelope(format!("wrapped_key: {e}")))?;

    // Lock order matches SessionStore::register: registrations, then user_keys.
    let result = state.store.registrations.modify(&msg.uid, |row| {
        if !row.otp_confirmed {
            return Err(RelayError::ProtocolViolation(format!(
                "key received before otp confirmed for {}",
                msg.uid
            )));
        }
        if row.symmetric_key_received {
            return Err(RelayError::ProtocolViolation(format!(
                "session key already received for {}",
                msg.uid
            )));
        }

        let stored = state.store.user_keys.modify(&msg.uid, |keys| {
            keys.wrapped_symmetric_key = Some(msg.wrapped_key.clone());
        });
        if stored.is_none() {
            return Err(RelayError::UnknownUid {
                uid: msg.uid.to_string(),
            });
        }

        row.symmetric_key_received = true;
        Ok(row.try_complete())
    });

    let complete = result.ok_or_else(|| RelayError::UnknownUid {
        uid: msg.uid.to_string(),
    })??;

    if complete {
        tracing::info!(uid = %msg.uid, "registration complete");
    }
    Ok(())
}

fn otp_envelope(uid: &Uid, otp: String) -> Envelope {
    Envelope::Otp(Otp {
        uid: uid.clone(),
        otp,
    })
}
