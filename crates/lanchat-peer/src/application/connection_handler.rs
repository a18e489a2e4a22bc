//! ConnectionHandler: one socket plus its framing and authentication flag.
//!
//! The handler sits between a raw byte stream and the rest of the
//! application:
//!
//! ```text
//! socket bytes ──► FrameDecoder ──► line ──┬─ AUTH_* ────────► AuthManager
//!                                          ├─ other, authed ─► returned to caller
//!                                          └─ other, not yet ► dropped (logged)
//! ```
//!
//! Before authentication, a line that is not even valid JSON is handed to the
//! `AuthManager` too, which fails the handshake with "Invalid message format".
//! After authentication such lines are logged and dropped.

use lanchat_core::protocol::codec::{decode_frame, encode_frame};
use lanchat_core::protocol::framing::FrameDecoder;
use lanchat_core::{
    AuthError, AuthManager, AuthRole, ConnectionId, Envelope, Peer, ProtocolError, SendFn,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for connection handler operations.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The byte stream violated the framing rules.
    #[error("framing error: {0}")]
    Framing(#[from] ProtocolError),

    /// The handshake could not encode a reply.
    #[error("handshake error: {0}")]
    Auth(#[from] AuthError),

    /// The socket refused the outgoing bytes.
    #[error("send failed on connection {0}")]
    SendFailed(ConnectionId),
}

/// The minimal socket surface the application layer needs.
///
/// Infrastructure provides a TCP implementation; tests provide recording
/// doubles.  Incoming bytes do not flow through this trait: they arrive as
/// events tagged with [`PeerSocket::connection_id`].
#[cfg_attr(test, mockall::automock)]
pub trait PeerSocket: Send {
    /// Identifier assigned when the socket was accepted or connected.
    fn connection_id(&self) -> &ConnectionId;

    /// Returns a function that queues bytes for writing on this socket.
    fn sender(&self) -> SendFn;

    /// Closes the socket.  Queued bytes are flushed first where possible.
    fn destroy(&mut self);
}

/// Owns one socket for the lifetime of a connection.
pub struct ConnectionHandler<S: PeerSocket> {
    socket: S,
    connection_id: ConnectionId,
    send: SendFn,
    role: AuthRole,
    peer: Option<Peer>,
    authenticated: bool,
    decoder: FrameDecoder,
}

impl<S: PeerSocket> ConnectionHandler<S> {
    /// Wraps `socket`.  `peer` is `None` for accepted connections because
    /// the handshake carries no identity.
    pub fn new(socket: S, role: AuthRole, peer: Option<Peer>, max_frame_bytes: usize) -> Self {
        let connection_id = socket.connection_id().clone();
        let send = socket.sender();
        Self {
            socket,
            connection_id,
            send,
            role,
            peer,
            authenticated: false,
            decoder: FrameDecoder::new(max_frame_bytes),
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn role(&self) -> AuthRole {
        self.role
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Starts the handshake for this connection in `auth`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Auth`] if the challenge cannot be encoded.
    pub fn start_authentication(&self, auth: &mut AuthManager) -> Result<(), HandlerError> {
        auth.start_authentication(self.connection_id.clone(), self.role, self.send.clone())?;
        Ok(())
    }

    /// Feeds one chunk of received bytes and returns the completed lines.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Framing`] for oversized frames or invalid
    /// UTF-8.  The connection should be torn down.
    pub fn frames(&mut self, chunk: &[u8]) -> Result<Vec<String>, HandlerError> {
        Ok(self.decoder.push(chunk)?)
    }

    /// Routes one line.  Returns the envelope when it is an application
    /// message on an authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Auth`] if the handshake cannot encode a reply.
    pub fn route_line(
        &self,
        line: &str,
        auth: &mut AuthManager,
    ) -> Result<Option<Envelope>, HandlerError> {
        match decode_frame(line) {
            Ok(envelope) if envelope.is_auth() => {
                auth.handle_message(&self.connection_id, line)?;
                Ok(None)
            }
            Ok(envelope) if self.authenticated => Ok(Some(envelope)),
            Ok(envelope) => {
                warn!(
                    connection = %self.connection_id,
                    kind = %envelope.kind,
                    "dropping application message before authentication"
                );
                Ok(None)
            }
            Err(_) if !self.authenticated => {
                auth.handle_message(&self.connection_id, line)?;
                Ok(None)
            }
            Err(e) => {
                warn!(connection = %self.connection_id, "dropping undecodable line: {e}");
                Ok(None)
            }
        }
    }

    /// Encodes and queues one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Framing`] if encoding fails or
    /// [`HandlerError::SendFailed`] if the socket refused the bytes.
    pub fn send(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let bytes = encode_frame(envelope)?;
        if (self.send)(&self.connection_id, &bytes) {
            Ok(())
        } else {
            Err(HandlerError::SendFailed(self.connection_id.clone()))
        }
    }

    /// Closes the socket.  Consumes the handler so it cannot be used again.
    pub fn disconnect(mut self) {
        debug!(connection = %self.connection_id, "closing connection");
        self.socket.destroy();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
