use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use relaychat_shared::error::RelayError;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::connection::handle_connection;
use crate::state::RelayState;

/// TCP accept loop for the relay.
pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
}

impl RelayServer {
    /// Bind to the configured host and port.
    pub async fn bind(state: RelayState) -> Result<Self, RelayError> {
        let addr = state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::TransportFailure(format!("failed to bind {addr}: {e}")))?;
        Ok(Self::from_listener(listener, state))
    }

    pub fn from_listener(listener: TcpListener, state: RelayState) -> Self {
        Self { listener, state }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Accept connections until `shutdown` resolves, then wait for every
    /// connection task to finish.
    pub async fn run<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        let Self { listener, state } = self;
        let limit = Arc::new(Semaphore::new(state.config.max_connections));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!(
            addr = %listener.local_addr()?,
            max_connections = state.config.max_connections,
            "relay listening"
        );

        loop {
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = limit.clone().acquire_owned() => permit
                    .map_err(|e| RelayError::TransportFailure(e.to_string()))?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let state = state.clone();
            let shutdown_rx = shutdown_rx.clone();
            tasks.spawn(async move {
                handle_connection(stream, peer, state, shutdown_rx).await;
                drop(permit);
            });
        }

        tracing::info!(open_connections = tasks.len(), "relay shutting down");
        let _ = shutdown_tx.send(true);
        while tasks.join_next().await.is_some() {}
        state.connections.clear();
        Ok(())
    }
}
