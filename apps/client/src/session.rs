//! Connection to the relay, driven by one background task.
//!
//! The task owns the socket and the [`Handshake`]. It registers as soon as it
//! starts, answers the relay's OTP and KEY messages, seals outgoing text on
//! request and delivers verified incoming messages over a channel.

use std::sync::Arc;

use relaychat_shared::envelope::{self, Decoded, Envelope};
use relaychat_shared::error::RelayError;
use relaychat_shared::frame::{read_frame, write_envelope};
use relaychat_shared::ids::Uid;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::handshake::{ClientState, Handshake};
use crate::prompt::OtpPrompt;

const COMMAND_CAPACITY: usize = 32;
const INCOMING_CAPACITY: usize = 64;

/// A decrypted message relayed from another client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: Uid,
    pub text: String,
}

enum Command {
    Send {
        destination: Uid,
        text: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
}

pub struct ClientSession {
    uid: Uid,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ClientState>,
    incoming: mpsc::Receiver<IncomingMessage>,
    task: JoinHandle<()>,
}

impl ClientSession {
    /// Connect to the configured relay and begin registering.
    pub async fn connect(
        config: &ClientConfig,
        handshake: Handshake,
        prompt: Arc<dyn OtpPrompt>,
    ) -> Result<Self, RelayError> {
        let addr = config.relay_addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| RelayError::TransportFailure(format!("failed to connect to {addr}: {e}")))?;
        tracing::debug!(addr = %addr, "connected to relay");
        Ok(Self::start(stream, handshake, prompt, config.max_frame_bytes))
    }

    /// Drive a handshake over an already-open stream.
    pub fn start<S>(
        stream: S,
        handshake: Handshake,
        prompt: Arc<dyn OtpPrompt>,
        max_frame_bytes: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let uid = handshake.uid().clone();
        let (read_half, write_half) = tokio::io::split(stream);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (state_tx, state_rx) = watch::channel(handshake.state());

        let driver = Driver {
            handshake,
            prompt,
            state: state_tx,
            incoming: incoming_tx,
        };
        let task = tokio::spawn(driver.run(
            BufReader::new(read_half),
            write_half,
            command_rx,
            max_frame_bytes,
        ));

        Self {
            uid,
            commands: command_tx,
            state: state_rx,
            incoming: incoming_rx,
            task,
        }
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Wait until the handshake reaches COMPLETED.
    pub async fn wait_registered(&mut self) -> Result<(), RelayError> {
        self.wait_for_state(ClientState::Completed).await
    }

    /// Wait until the handshake reaches `target`.
    pub async fn wait_for_state(&mut self, target: ClientState) -> Result<(), RelayError> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| {
                RelayError::TransportFailure(format!("connection closed before reaching {target}"))
            })
    }

    /// Seal `text` for `destination` and send it through the relay.
    pub async fn send_message(&self, destination: Uid, text: &str) -> Result<(), RelayError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Send {
                destination,
                text: text.to_string(),
                reply,
            })
            .await
            .map_err(|_| connection_closed())?;
        result.await.map_err(|_| connection_closed())?
    }

    /// Next verified message, or `None` once the connection is gone.
    pub async fn next_message(&mut self) -> Option<IncomingMessage> {
        self.incoming.recv().await
    }

    /// Close the connection and wait for the background task to exit.
    pub async fn close(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        let _ = task.await;
    }
}

fn connection_closed() -> RelayError {
    RelayError::TransportFailure("connection to relay closed".into())
}

struct Driver {
    handshake: Handshake,
    prompt: Arc<dyn OtpPrompt>,
    state: watch::Sender<ClientState>,
    incoming: mpsc::Sender<IncomingMessage>,
}

impl Driver {
    async fn run<R, W>(
        mut self,
        reader: R,
        mut writer: W,
        mut commands: mpsc::Receiver<Command>,
        max_frame_bytes: usize,
    ) where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let uid = self.handshake.uid().clone();
        let opening = match self.handshake.start() {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(uid = %uid, error = %e, "could not start registration");
                return;
            }
        };
        self.publish_state();
        if let Err(e) = write_envelope(&mut writer, &opening).await {
            tracing::error!(uid = %uid, error = %e, "failed to send registration");
            return;
        }

        // Frames are read on their own task so a partially read line is never
        // lost when a command wins the select below.
        let (frame_tx, mut frames) = mpsc::channel(INCOMING_CAPACITY);
        let read_handle = tokio::spawn(read_loop(reader, frame_tx, max_frame_bytes));

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Ok(bytes)) => self.handle_frame(&bytes, &mut writer).await,
                    Some(Err(e)) => {
                        tracing::warn!(uid = %uid, error = %e, "closing connection after read error");
                        break;
                    }
                    None => {
                        tracing::info!(uid = %uid, "relay closed the connection");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Send { destination, text, reply }) => {
                        let result = match self.handshake.seal(destination, text.as_bytes()) {
                            Ok(env) => write_envelope(&mut writer, &env).await,
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    None => break,
                },
            }
        }

        read_handle.abort();
    }

    async fn handle_frame<W>(&mut self, bytes: &[u8], writer: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        let uid = self.handshake.uid().clone();
        let env = match envelope::decode(bytes) {
            Ok(Decoded::Known(env)) => env,
            Ok(Decoded::Unknown { kind }) => {
                tracing::debug!(uid = %uid, kind = %kind, "ignoring unknown envelope kind");
                return;
            }
            Err(e) => {
                tracing::warn!(uid = %uid, error = %e, "discarding malformed envelope");
                return;
            }
        };

        let kind = env.kind();
        let reply = match env {
            Envelope::Otp(msg) => {
                if !self.handshake.accepts_otp(&msg) {
                    tracing::warn!(uid = %uid, state = %self.handshake.state(), "unexpected OTP ignored");
                    return;
                }
                match self.prompt.obtain(&msg).await {
                    Ok(value) => self.handshake.on_otp(&msg, value),
                    Err(e) => Err(e),
                }
            }
            Envelope::Key(msg) => self.handshake.on_key(&msg),
            Envelope::Content(msg) => {
                match self.handshake.open(&msg) {
                    Ok(plaintext) => {
                        let message = IncomingMessage {
                            from: msg.uid,
                            text: String::from_utf8_lossy(&plaintext).into_owned(),
                        };
                        if self.incoming.send(message).await.is_err() {
                            tracing::debug!(uid = %uid, "incoming receiver dropped");
                        }
                    }
                    Err(e) => tracing::warn!(uid = %uid, from = %msg.uid, error = %e, "dropping relayed message"),
                }
                return;
            }
            Envelope::Ack(msg) => {
                tracing::debug!(uid = %uid, ack = %msg.ack, "ack received");
                return;
            }
            Envelope::ClientRegistration(_) => Err(RelayError::ProtocolViolation(
                "CLIENT_REGISTRATION sent by relay".into(),
            )),
        };

        match reply {
            Ok(env) => {
                if let Err(e) = write_envelope(writer, &env).await {
                    tracing::warn!(uid = %uid, %kind, error = %e, "failed to send reply");
                }
                self.publish_state();
            }
            Err(e) => tracing::warn!(uid = %uid, %kind, error = %e, "protocol violation"),
        }
    }

    fn publish_state(&self) {
        let state = self.handshake.state();
        if self.state.send_replace(state) != state {
            tracing::debug!(uid = %self.handshake.uid(), state = %state, "handshake advanced");
            if state == ClientState::Completed {
                tracing::info!(uid = %self.handshake.uid(), "registration complete");
            }
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    frames: mpsc::Sender<Result<Vec<u8>, RelayError>>,
    max_frame_bytes: usize,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(frame)) => {
                if frames.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::AutoEcho;
    use relaychat_crypto::{generate_asymmetric_keypair, seal_content, unwrap_symmetric_key};
    use relaychat_shared::envelope::{Content, Key, Otp};
    use relaychat_shared::frame::read_envelope;
    use tokio::io::DuplexStream;

    const MAX: usize = 64 * 1024;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    async fn expect(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> Envelope {
        match read_envelope(reader, MAX).await.unwrap().unwrap() {
            Decoded::Known(env) => env,
            Decoded::Unknown { kind } => panic!("unexpected kind {kind}"),
        }
    }

    #[tokio::test]
    async fn handshake_and_delivery_against_scripted_relay() {
        let (client_io, relay_io) = tokio::io::duplex(16 * 1024);
        let (relay_read, mut relay_write) = tokio::io::split(relay_io);
        let mut relay_read = BufReader::new(relay_read);
        let relay_keys = generate_asymmetric_keypair();

        let mut session = ClientSession::start(
            client_io,
            Handshake::generate(uid("777")),
            Arc::new(AutoEcho),
            MAX,
        );

        let Envelope::ClientRegistration(reg) = expect(&mut relay_read).await else {
            panic!("expected CLIENT_REGISTRATION");
        };
        assert_eq!(reg.uid, uid("777"));

        let otp = Envelope::Otp(Otp {
            uid: uid("777"),
            otp: "042918".into(),
        });
        write_envelope(&mut relay_write, &otp).await.unwrap();
        assert_eq!(expect(&mut relay_read).await, otp);

        let server_key = Envelope::Key(Key {
            uid: uid("777"),
            wrapped_key: relay_keys.public_key().to_base64(),
        });
        write_envelope(&mut relay_write, &server_key).await.unwrap();
        let Envelope::Key(wrapped) = expect(&mut relay_read).await else {
            panic!("expected KEY");
        };

        session.wait_registered().await.unwrap();
        assert_eq!(session.state(), ClientState::Completed);

        let session_key = unwrap_symmetric_key(&relay_keys, &wrapped.wrapped_key).unwrap();
        let sealed = seal_content(&session_key, &relay_keys, b"hi").unwrap();
        let content = Envelope::Content(Content {
            uid: uid("555"),
            destination_uid: uid("777"),
            content: sealed.content,
            mac: sealed.mac,
            signature: sealed.signature,
        });
        write_envelope(&mut relay_write, &content).await.unwrap();

        let message = session.next_message().await.unwrap();
        assert_eq!(
            message,
            IncomingMessage {
                from: uid("555"),
                text: "hi".into(),
            }
        );

        session.send_message(uid("555"), "hello back").await.unwrap();
        let Envelope::Content(outgoing) = expect(&mut relay_read).await else {
            panic!("expected CONTENT");
        };
        assert_eq!(outgoing.uid, uid("777"));
        assert_eq!(outgoing.destination_uid, uid("555"));

        session.close().await;
    }

    #[tokio::test]
    async fn send_before_registration_is_rejected() {
        let (client_io, _relay_io) = tokio::io::duplex(16 * 1024);
        let session = ClientSession::start(
            client_io,
            Handshake::generate(uid("555")),
            Arc::new(AutoEcho),
            MAX,
        );

        let result = session.send_message(uid("777"), "hi").await;
        assert!(matches!(result, Err(RelayError::NotRegistered { .. })));
    }

    #[tokio::test]
    async fn wait_registered_fails_when_relay_hangs_up() {
        let (client_io, relay_io) = tokio::io::duplex(16 * 1024);
        let mut session = ClientSession::start(
            client_io,
            Handshake::generate(uid("555")),
            Arc::new(AutoEcho),
            MAX,
        );
        drop(relay_io);

        let result = session.wait_registered().await;
        assert!(matches!(result, Err(RelayError::TransportFailure(_))));
    }

    #[tokio::test]
    async fn unexpected_key_is_ignored() {
        let (client_io, relay_io) = tokio::io::duplex(16 * 1024);
        let (relay_read, mut relay_write) = tokio::io::split(relay_io);
        let mut relay_read = BufReader::new(relay_read);
        let mut session = ClientSession::start(
            client_io,
            Handshake::generate(uid("555")),
            Arc::new(AutoEcho),
            MAX,
        );
        expect(&mut relay_read).await;

        let key = Envelope::Key(Key {
            uid: uid("555"),
            wrapped_key: generate_asymmetric_keypair().public_key().to_base64(),
        });
        write_envelope(&mut relay_write, &key).await.unwrap();

        // Still answers an OTP afterwards.
        let otp = Envelope::Otp(Otp {
            uid: uid("555"),
            otp: "123456".into(),
        });
        write_envelope(&mut relay_write, &otp).await.unwrap();
        assert_eq!(expect(&mut relay_read).await, otp);
        session
            .wait_for_state(ClientState::WaitForServerKey)
            .await
            .unwrap();
    }
}
