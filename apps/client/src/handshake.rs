//! Client side of the registration handshake, independent of any transport.
//!
//! `Handshake` owns the client's long-term keypair and session key. Each
//! method either performs the transition the current state allows and returns
//! the envelope to send, or returns `ProtocolViolation` and leaves the state
//! untouched.

use relaychat_crypto::{
    generate_asymmetric_keypair, generate_symmetric_key, open_content, seal_content,
    wrap_symmetric_key, KeyPair, PublicKey, SealedContent, SymmetricKey,
};
use relaychat_shared::envelope::{ClientRegistration, Content, Envelope, Key, Otp};
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::Uid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Registration,
    WaitForOtp,
    WaitForServerKey,
    Completed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ClientState::Registration => "REGISTRATION",
            ClientState::WaitForOtp => "WAIT_FOR_OTP",
            ClientState::WaitForServerKey => "WAIT_FOR_SERVER_KEY",
            ClientState::Completed => "COMPLETED",
        })
    }
}

pub struct Handshake {
    uid: Uid,
    state: ClientState,
    keys: KeyPair,
    session_key: SymmetricKey,
    server_key: Option<PublicKey>,
}

impl Handshake {
    pub fn new(uid: Uid, keys: KeyPair, session_key: SymmetricKey) -> Self {
        Self {
            uid,
            state: ClientState::Registration,
            keys,
            session_key,
            server_key: None,
        }
    }

    /// Start a handshake with a freshly generated keypair and session key.
    pub fn generate(uid: Uid) -> Self {
        Self::new(uid, generate_asymmetric_keypair(), generate_symmetric_key())
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ClientState::Completed
    }

    /// Build the opening `CLIENT_REGISTRATION`. REGISTRATION → WAIT_FOR_OTP.
    pub fn start(&mut self) -> Result<Envelope, RelayError> {
        if self.state != ClientState::Registration {
            return Err(self.violation("CLIENT_REGISTRATION"));
        }
        self.state = ClientState::WaitForOtp;
        Ok(Envelope::ClientRegistration(ClientRegistration {
            uid: self.uid.clone(),
            public_key: self.keys.public_key().to_base64(),
        }))
    }

    /// True when an incoming OTP should be answered.
    ///
    /// A code arriving in WAIT_FOR_SERVER_KEY is a reissue after expiry and
    /// is answered without a transition.
    pub fn accepts_otp(&self, msg: &Otp) -> bool {
        msg.uid == self.uid
            && matches!(
                self.state,
                ClientState::WaitForOtp | ClientState::WaitForServerKey
            )
    }

    /// Echo `value` for an issued OTP. WAIT_FOR_OTP → WAIT_FOR_SERVER_KEY.
    pub fn on_otp(&mut self, msg: &Otp, value: String) -> Result<Envelope, RelayError> {
        if !self.accepts_otp(msg) {
            return Err(self.violation("OTP"));
        }
        self.state = ClientState::WaitForServerKey;
        Ok(Envelope::Otp(Otp {
            uid: self.uid.clone(),
            otp: value,
        }))
    }

    /// Wrap the session key under the relay's public key.
    /// WAIT_FOR_SERVER_KEY → COMPLETED.
    pub fn on_key(&mut self, msg: &Key) -> Result<Envelope, RelayError> {
        if self.state != ClientState::WaitForServerKey || msg.uid != self.uid {
            return Err(self.violation("KEY"));
        }
        let server_key = PublicKey::from_base64(&msg.wrapped_key)?;
        let wrapped = wrap_symmetric_key(&self.session_key, &server_key)?;

        self.server_key = Some(server_key);
        self.state = ClientState::Completed;
        Ok(Envelope::Key(Key {
            uid: self.uid.clone(),
            wrapped_key: wrapped,
        }))
    }

    /// Seal `text` for `destination`. Only valid once the handshake completed.
    pub fn seal(&self, destination: Uid, text: &[u8]) -> Result<Envelope, RelayError> {
        if !self.is_complete() {
            return Err(RelayError::NotRegistered {
                uid: self.uid.to_string(),
            });
        }
        let sealed = seal_content(&self.session_key, &self.keys, text)?;
        Ok(Envelope::Content(Content {
            uid: self.uid.clone(),
            destination_uid: destination,
            content: sealed.content,
            mac: sealed.mac,
            signature: sealed.signature,
        }))
    }

    /// Verify a relayed message against the relay's signature and our MAC,
    /// then decrypt it.
    pub fn open(&self, msg: &Content) -> Result<Vec<u8>, RelayError> {
        let server_key = match (&self.server_key, self.state) {
            (Some(key), ClientState::Completed) => key,
            _ => return Err(self.violation("CONTENT")),
        };
        if msg.destination_uid != self.uid {
            return Err(RelayError::ProtocolViolation(format!(
                "CONTENT for {} delivered to {}",
                msg.destination_uid, self.uid
            )));
        }
        let sealed = SealedContent {
            content: msg.content.clone(),
            mac: msg.mac.clone(),
            signature: msg.signature.clone(),
        };
        Ok(open_content(&self.session_key, Some(server_key), &sealed)?)
    }

    fn violation(&self, kind: &str) -> RelayError {
        RelayError::ProtocolViolation(format!("{kind} received in state {}", self.state))
    }
}
