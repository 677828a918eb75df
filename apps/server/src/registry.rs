use dashmap::DashMap;
use relaychat_shared::envelope::Envelope;
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::{ConnectionId, Uid};
use tokio::sync::mpsc;

pub const CONNECTION_MPSC_CAPACITY: usize = 256;

/// Outbound half of one live connection.
#[derive(Debug, Clone)]
pub struct Route {
    pub connection_id: ConnectionId,
    pub sender: mpsc::Sender<Envelope>,
}

/// Maps registered uids to the connection currently serving them.
#[derive(Default)]
pub struct ConnectionRegistry {
    routes: DashMap<Uid, Route>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route traffic for `uid` to this connection, replacing any stale route.
    pub fn bind(&self, uid: Uid, connection_id: ConnectionId, sender: mpsc::Sender<Envelope>) {
        self.routes.insert(
            uid,
            Route {
                connection_id,
                sender,
            },
        );
    }

    /// Drop the route for `uid` if it still belongs to `connection_id`.
    ///
    /// A later connection that rebound the uid keeps its route.
    pub fn unbind(&self, uid: &Uid, connection_id: ConnectionId) -> bool {
        self.routes
            .remove_if(uid, |_, route| route.connection_id == connection_id)
            .is_some()
    }

    pub fn is_online(&self, uid: &Uid) -> bool {
        self.routes.contains_key(uid)
    }

    /// Enqueue an envelope for the connection bound to `uid`.
    pub fn send(&self, uid: &Uid, envelope: Envelope) -> Result<(), RelayError> {
        // Clone the sender so the shard lock is not held across try_send.
        let sender = self
            .routes
            .get(uid)
            .map(|route| route.sender.clone())
            .ok_or_else(|| RelayError::RecipientOffline {
                uid: uid.to_string(),
            })?;

        sender.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => RelayError::RecipientOffline {
                uid: uid.to_string(),
            },
            mpsc::error::TrySendError::Full(_) => {
                RelayError::TransportFailure(format!("outbound queue full for {uid}"))
            }
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Drop every route, closing each connection's outbound queue.
    pub fn clear(&self) {
        self.routes.clear();
    }
}
