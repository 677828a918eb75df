use std::net::SocketAddr;
use std::time::Duration;

use relaychat_shared::envelope::Envelope;
use relaychat_shared::frame::{read_frame, write_envelope};
use relaychat_shared::ids::ConnectionId;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::registry::CONNECTION_MPSC_CAPACITY;
use crate::session::{Flow, ServerSession};
use crate::state::RelayState;

/// How long queued replies may take to flush once reading has stopped.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one accepted TCP connection until EOF, error, or shutdown.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: RelayState,
    mut shutdown: watch::Receiver<bool>,
) {
    let connection_id = ConnectionId::new();
    tracing::debug!(%connection_id, %peer, "connection accepted");

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (tx, rx) = mpsc::channel(CONNECTION_MPSC_CAPACITY);

    let mut send_handle = tokio::spawn(send_loop(write_half, rx, connection_id));
    let mut session = ServerSession::new(state.clone(), connection_id, tx);
    let max_frame_bytes = state.config.max_frame_bytes;

    // Wait for the reader to finish, the writer to fail, or shutdown.
    let send_finished = tokio::select! {
        _ = recv_loop(&mut reader, &mut session, max_frame_bytes) => false,
        _ = &mut send_handle => {
            tracing::debug!(%connection_id, "send loop exited, stopping recv loop");
            true
        }
        _ = shutdown.changed() => {
            tracing::debug!(%connection_id, "shutdown requested");
            false
        }
    };

    // Dropping the session and its route closes the outbound queue.
    session.close();
    if !send_finished && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_handle).await.is_err() {
        send_handle.abort();
    }

    tracing::debug!(%connection_id, %peer, "connection closed");
}

async fn recv_loop<R>(reader: &mut R, session: &mut ServerSession, max_frame_bytes: usize)
where
    R: AsyncBufRead + Unpin,
{
    let connection_id = session.connection_id();
    loop {
        match read_frame(reader, max_frame_bytes).await {
            Ok(Some(frame)) => {
                if session.handle_frame(&frame) == Flow::Close {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(%connection_id, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "closing connection after read error");
                break;
            }
        }
    }
}

async fn send_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Envelope>, connection_id: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(env) = rx.recv().await {
        if let Err(e) = write_envelope(&mut writer, &env).await {
            tracing::debug!(%connection_id, error = %e, "write failed, stopping send loop");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use relaychat_shared::envelope::{ClientRegistration, Decoded};
    use relaychat_shared::frame::{read_envelope, write_frame};
    use relaychat_shared::ids::Uid;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn serve_one(state: RelayState) -> (TcpStream, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, state, shutdown_rx).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        (client, shutdown_tx, handle)
    }

    fn test_state() -> RelayState {
        RelayState::new(
            ServerConfig {
                max_frame_bytes: 1024,
                ..Default::default()
            },
            relaychat_crypto::generate_asymmetric_keypair(),
        )
    }

    #[tokio::test]
    async fn registration_over_tcp_receives_otp() {
        let state = test_state();
        let (client, _shutdown, _handle) = serve_one(state.clone()).await;
        let (read_half, mut write_half) = client.into_split();
        let mut reader = BufReader::new(read_half);

        let env = Envelope::ClientRegistration(ClientRegistration {
            uid: Uid::parse("555").unwrap(),
            public_key: relaychat_crypto::generate_asymmetric_keypair()
                .public_key()
                .to_base64(),
        });
        write_envelope(&mut write_half, &env).await.unwrap();

        let reply = read_envelope(&mut reader, 1024).await.unwrap().unwrap();
        assert!(matches!(reply, Decoded::Known(Envelope::Otp(_))));
        assert!(state.store.registrations.contains(&Uid::parse("555").unwrap()));
    }

    #[tokio::test]
    async fn malformed_frame_keeps_connection_open() {
        let state = test_state();
        let (client, _shutdown, _handle) = serve_one(state.clone()).await;
        let (read_half, mut write_half) = client.into_split();
        let mut reader = BufReader::new(read_half);

        write_frame(&mut write_half, b"{not json").await.unwrap();
        let env = Envelope::ClientRegistration(ClientRegistration {
            uid: Uid::parse("555").unwrap(),
            public_key: relaychat_crypto::generate_asymmetric_keypair()
                .public_key()
                .to_base64(),
        });
        write_envelope(&mut write_half, &env).await.unwrap();

        let reply = read_envelope(&mut reader, 1024).await.unwrap().unwrap();
        assert!(matches!(reply, Decoded::Known(Envelope::Otp(_))));
    }

    #[tokio::test]
    async fn oversize_frame_closes_connection() {
        let state = test_state();
        let (client, _shutdown, handle) = serve_one(state).await;
        let (read_half, mut write_half) = client.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(&vec![b'x'; 4096]).await.unwrap();
        write_half.flush().await.unwrap();

        handle.await.unwrap();
        let next = read_envelope(&mut reader, 1024).await;
        assert!(!matches!(next, Ok(Some(_))));
    }

    #[tokio::test]
    async fn disconnect_unbinds_route() {
        let state = test_state();
        let (client, _shutdown, handle) = serve_one(state.clone()).await;
        let (read_half, mut write_half) = client.into_split();
        let mut reader = BufReader::new(read_half);

        let uid = Uid::parse("555").unwrap();
        let env = Envelope::ClientRegistration(ClientRegistration {
            uid: uid.clone(),
            public_key: relaychat_crypto::generate_asymmetric_keypair()
                .public_key()
                .to_base64(),
        });
        write_envelope(&mut write_half, &env).await.unwrap();
        read_envelope(&mut reader, 1024).await.unwrap().unwrap();
        assert!(state.connections.is_online(&uid));

        drop(write_half);
        drop(reader);
        handle.await.unwrap();

        assert!(!state.connections.is_online(&uid));
        assert!(state.store.registrations.contains(&uid));
    }

    #[tokio::test]
    async fn shutdown_signal_ends_connection() {
        let state = test_state();
        let (_client, shutdown, handle) = serve_one(state).await;
        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }
}
