/// Shared error type used across the relay, its clients and the wire layer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("uid already registered: {uid}")]
    DuplicateRegistration { uid: String },

    #[error("unknown uid: {uid}")]
    UnknownUid { uid: String },

    #[error("otp expired for {uid}, reissued")]
    OtpExpired { uid: String },

    #[error("otp mismatch for {uid}")]
    OtpMismatch { uid: String },

    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("recipient offline: {uid}")]
    RecipientOffline { uid: String },

    #[error("not registered: {uid}")]
    NotRegistered { uid: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid uid: {0}")]
    InvalidUid(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::TransportFailure(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::MalformedEnvelope(err.to_string())
    }
}
