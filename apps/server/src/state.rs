use std::sync::Arc;

use relaychat_crypto::KeyPair;

use crate::config::ServerConfig;
use crate::otp::OtpIssuer;
use crate::registry::ConnectionRegistry;
use crate::store::SessionStore;

/// Shared relay state handed to every connection task.
///
/// Everything is behind `Arc`, so cloning `RelayState` is cheap.
#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<SessionStore>,
    pub connections: Arc<ConnectionRegistry>,
    /// The relay's long-term keypair. Clients wrap their session keys under
    /// its public half.
    pub keys: Arc<KeyPair>,
    pub otp: OtpIssuer,
    pub config: Arc<ServerConfig>,
}

impl RelayState {
    pub fn new(config: ServerConfig, keys: KeyPair) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            keys: Arc::new(keys),
            otp: OtpIssuer::new(config.otp_length),
            config: Arc::new(config),
        }
    }
}
