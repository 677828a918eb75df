//! Per-connection envelope dispatch.
//!
//! A `ServerSession` owns everything one connection knows about itself: its
//! id, its outbound queue, and the uid it registered (if any). Every error is
//! logged and the offending envelope dropped; only an exhausted violation
//! budget closes the connection.

use chrono::Utc;
use relaychat_shared::envelope::{self, Decoded, Envelope, MessageKind};
use relaychat_shared::error::RelayError;
use relaychat_shared::ids::{ConnectionId, Uid};
use tokio::sync::mpsc;

use crate::registration::{handle_key, handle_otp, handle_registration, OtpOutcome};
use crate::relay::relay_content;
use crate::state::RelayState;

/// Whether the connection should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ServerSession {
    state: RelayState,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<Envelope>,
    bound_uid: Option<Uid>,
    violations: u32,
}

impl ServerSession {
    pub fn new(state: RelayState, connection_id: ConnectionId, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            state,
            connection_id,
            outbound,
            bound_uid: None,
            violations: 0,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn bound_uid(&self) -> Option<&Uid> {
        self.bound_uid.as_ref()
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Decode and handle one raw frame.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Flow {
        match envelope::decode(frame) {
            Ok(Decoded::Known(env)) => self.handle_envelope(env),
            Ok(Decoded::Unknown { kind }) => {
                tracing::debug!(connection_id = %self.connection_id, kind = %kind, "ignoring unknown envelope kind");
                Flow::Continue
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "discarding malformed envelope");
                Flow::Continue
            }
        }
    }

    /// Handle one decoded envelope to completion.
    pub fn handle_envelope(&mut self, env: Envelope) -> Flow {
        let kind = env.kind();
        let uid = env.uid().clone();

        match self.dispatch(env) {
            Ok(flow) => flow,
            Err(e) => self.report(kind, &uid, e),
        }
    }

    fn dispatch(&mut self, env: Envelope) -> Result<Flow, RelayError> {
        match env {
            Envelope::ClientRegistration(msg) => {
                if let Some(bound) = &self.bound_uid {
                    return Err(RelayError::ProtocolViolation(format!(
                        "connection already registered as {bound}"
                    )));
                }
                let reply = handle_registration(&self.state, &msg, Utc::now())?;
                self.state
                    .connections
                    .bind(msg.uid.clone(), self.connection_id, self.outbound.clone());
                self.bound_uid = Some(msg.uid);
                self.reply(reply);
                Ok(Flow::Continue)
            }
            Envelope::Otp(msg) => {
                self.authorize(&msg.uid, MessageKind::Otp)?;
                match handle_otp(&self.state, &msg, Utc::now())? {
                    OtpOutcome::Confirmed(reply) => self.reply(reply),
                    OtpOutcome::Reissued { reply, cause } => {
                        tracing::warn!(uid = %msg.uid, error = %cause, "otp reissued");
                        self.reply(reply);
                    }
                    OtpOutcome::Abandoned { cause } => {
                        tracing::warn!(
                            uid = %msg.uid,
                            connection_id = %self.connection_id,
                            error = %cause,
                            "closing connection after failed otp"
                        );
                        self.state.connections.unbind(&msg.uid, self.connection_id);
                        self.bound_uid = None;
                        return Ok(Flow::Close);
                    }
                }
                Ok(Flow::Continue)
            }
            Envelope::Key(msg) => {
                self.authorize(&msg.uid, MessageKind::Key)?;
                handle_key(&self.state, &msg).map(|()| Flow::Continue)
            }
            Envelope::Content(msg) => {
                self.authorize(&msg.uid, MessageKind::Content)?;
                relay_content(&self.state, &msg).map(|()| Flow::Continue)
            }
            Envelope::Ack(msg) => {
                tracing::debug!(uid = %msg.uid, ack = %msg.ack, "ack received");
                Ok(Flow::Continue)
            }
        }
    }

    /// Envelopes after registration must name the uid this connection bound.
    fn authorize(&self, uid: &Uid, kind: MessageKind) -> Result<(), RelayError> {
        match &self.bound_uid {
            Some(bound) if bound == uid => Ok(()),
            Some(bound) => Err(RelayError::ProtocolViolation(format!(
                "{kind} for {uid} on connection registered as {bound}"
            ))),
            None if !self.state.store.registrations.contains(uid) => match kind {
                MessageKind::Content => Err(RelayError::NotRegistered {
                    uid: uid.to_string(),
                }),
                _ => Err(RelayError::UnknownUid {
                    uid: uid.to_string(),
                }),
            },
            None => Err(RelayError::ProtocolViolation(format!(
                "{kind} for {uid} on a connection that has not registered"
            ))),
        }
    }

    /// Queue an envelope on this connection. Failures are logged only.
    fn reply(&self, env: Envelope) {
        if let Err(e) = self.outbound.try_send(env) {
            tracing::warn!(
                connection_id = %self.connection_id,
                error = %e,
                "failed to enqueue reply"
            );
        }
    }

    fn report(&mut self, kind: MessageKind, uid: &Uid, err: RelayError) -> Flow {
        let connection_id = self.connection_id;
        match &err {
            RelayError::ProtocolViolation(_) => {
                self.violations += 1;
                tracing::warn!(%connection_id, %kind, uid = %uid, error = %err, violations = self.violations, "protocol violation");
                let limit = self.state.config.max_protocol_violations;
                if limit > 0 && self.violations > limit {
                    tracing::warn!(%connection_id, "violation limit exceeded, closing connection");
                    return Flow::Close;
                }
            }
            RelayError::IntegrityFailure(_) | RelayError::OtpMismatch { .. } => {
                tracing::warn!(%connection_id, %kind, uid = %uid, error = %err, "message rejected");
            }
            RelayError::TransportFailure(_) => {
                tracing::warn!(%connection_id, %kind, uid = %uid, error = %err, "send failed");
            }
            RelayError::Crypto(_) | RelayError::Config(_) => {
                tracing::error!(%connection_id, %kind, uid = %uid, error = %err, "message dropped");
            }
            _ => {
                tracing::info!(%connection_id, %kind, uid = %uid, error = %err, "message dropped");
            }
        }
        Flow::Continue
    }

    /// Release this connection's route. Rows stay in the store.
    pub fn close(self) {
        if let Some(uid) = &self.bound_uid {
            if self.state.connections.unbind(uid, self.connection_id) {
                tracing::info!(uid = %uid, connection_id = %self.connection_id, "client disconnected");
            }
        }
    }
}
