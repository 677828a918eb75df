//! Wire envelope: `{"type": <KIND>, "data": {...}}` as UTF-8 JSON.
//!
//! Each message kind carries its own field struct. Decoding distinguishes an
//! unrecognized `type` (not an error, the handler ignores it) from malformed
//! JSON or a known kind with missing fields (`MalformedEnvelope`).

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::ids::Uid;

/// Opens registration for `uid` with the client's public key bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub uid: Uid,
    pub public_key: String,
}

/// One-time passcode, issued by the server and echoed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Otp {
    pub uid: Uid,
    pub otp: String,
}

/// Key material. Server→client it carries the server public key bundle;
/// client→server it carries the client's symmetric key wrapped under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub uid: Uid,
    pub wrapped_key: String,
}

/// Encrypted chat payload addressed from `uid` to `destination_uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub uid: Uid,
    pub destination_uid: Uid,
    /// Base64 symmetric ciphertext (nonce prepended).
    pub content: String,
    /// Base64 HMAC over the ciphertext bytes.
    pub mac: String,
    /// Base64 signature over the raw MAC bytes.
    pub signature: String,
}

/// Reserved acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub uid: Uid,
    pub ack: String,
}

/// Every message exchanged between a client and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    ClientRegistration(ClientRegistration),
    Otp(Otp),
    Key(Key),
    Content(Content),
    Ack(Ack),
}

/// Discriminant of an [`Envelope`], as written in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ClientRegistration,
    Otp,
    Key,
    Content,
    Ack,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::ClientRegistration,
        MessageKind::Otp,
        MessageKind::Key,
        MessageKind::Content,
        MessageKind::Ack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ClientRegistration => "CLIENT_REGISTRATION",
            MessageKind::Otp => "OTP",
            MessageKind::Key => "KEY",
            MessageKind::Content => "CONTENT",
            MessageKind::Ack => "ACK",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::ClientRegistration(_) => MessageKind::ClientRegistration,
            Envelope::Otp(_) => MessageKind::Otp,
            Envelope::Key(_) => MessageKind::Key,
            Envelope::Content(_) => MessageKind::Content,
            Envelope::Ack(_) => MessageKind::Ack,
        }
    }

    /// The uid the message claims to originate from (or be addressed to,
    /// for server→client traffic).
    pub fn uid(&self) -> &Uid {
        match self {
            Envelope::ClientRegistration(m) => &m.uid,
            Envelope::Otp(m) => &m.uid,
            Envelope::Key(m) => &m.uid,
            Envelope::Content(m) => &m.uid,
            Envelope::Ack(m) => &m.uid,
        }
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(Envelope),
    /// Well-formed JSON whose `type` names no known kind.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Serialize an envelope to UTF-8 JSON.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, RelayError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse one frame of UTF-8 JSON into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Decoded, RelayError> {
    let raw: RawEnvelope = serde_json::from_slice(bytes)?;
    if MessageKind::from_tag(&raw.kind).is_none() {
        return Ok(Decoded::Unknown { kind: raw.kind });
    }
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    Ok(Decoded::Known(envelope))
}
