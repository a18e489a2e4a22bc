//! ActiveConnectionCoordinator: at most one chat connection at a time.
//!
//! Several things compete to become "the" connection: an outgoing dial
//! triggered by discovery, a manual `/connect`, and any number of inbound
//! sockets.  The coordinator admits exactly one and destroys the rest.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//!                initiate_connection(peer)
//!  Idle ───────────────────────────────────► Connecting (pending_peer set)
//!   ▲                                           │ register_outgoing_connection
//!   │ register_incoming_connection              │ (same instance_id)
//!   │                                           ▼
//!   └──────────────┬────────────────────► Active, authenticating
//!                  │                            │ AuthEvent::Authenticated
//!                  │                            ▼
//!   disconnect /   │                       Active, authenticated  (is_connected)
//!   close / error ─┘
//! ```
//!
//! # Stale events
//!
//! Sockets and timers report back asynchronously.  Every event carries the
//! [`ConnectionId`] it belongs to; once a connection has been torn down, any
//! event still in flight for it is ignored.  This is what keeps a late
//! `Closed` from a rejected socket from tearing down the active connection.

use lanchat_core::{
    AuthError, AuthEvent, AuthManager, AuthRole, ConnectionId, Envelope, Peer, Secret, TimerFired,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::connection_handler::{ConnectionHandler, HandlerError, PeerSocket};

/// Reason reported when the remote side closes the stream.
pub const REASON_CLOSED_BY_PEER: &str = "Connection closed by peer";
/// Reason reported for a local `disconnect(None)`.
pub const REASON_LOCAL_DISCONNECT: &str = "Disconnected";

/// Error type for coordinator operations that the caller can act on.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// There is no authenticated connection to send on.
    #[error("not connected to a peer")]
    NotConnected,

    /// The active connection could not send.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The handshake could not encode a message.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Events emitted by the coordinator to the node.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// Please open a TCP connection to this peer and report back with
    /// `register_outgoing_connection` or `handle_connection_failure`.
    ConnectRequest(Peer),
    /// The active connection finished the handshake.  `peer` is `None` for
    /// accepted connections.
    Connected {
        connection_id: ConnectionId,
        peer: Option<Peer>,
    },
    /// The active connection ended.
    Disconnected { reason: String },
    /// The requested outgoing connection could not be opened.
    ConnectionFailed { peer: Peer, error: String },
    /// An application message arrived on the authenticated connection.
    MessageReceived {
        connection_id: ConnectionId,
        envelope: Envelope,
    },
    /// The handshake on the active connection failed; it has been closed.
    AuthFailed {
        connection_id: ConnectionId,
        reason: String,
    },
    /// The local user must supply the shared names for this connection.
    SecretRequested { connection_id: ConnectionId },
}

/// Enforces the single-active-connection rule.
pub struct ActiveConnectionCoordinator<S: PeerSocket> {
    auth: AuthManager,
    auth_rx: mpsc::UnboundedReceiver<AuthEvent>,
    active: Option<ConnectionHandler<S>>,
    connected_peer: Option<Peer>,
    is_connecting: bool,
    pending_peer: Option<Peer>,
    max_frame_bytes: usize,
    event_tx: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl<S: PeerSocket> ActiveConnectionCoordinator<S> {
    /// Creates a coordinator that authenticates through `auth`.
    ///
    /// `auth_rx` must be the receiver returned together with `auth`.
    pub fn new(
        auth: AuthManager,
        auth_rx: mpsc::UnboundedReceiver<AuthEvent>,
        max_frame_bytes: usize,
    ) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            auth,
            auth_rx,
            active: None,
            connected_peer: None,
            is_connecting: false,
            pending_peer: None,
            max_frame_bytes,
            event_tx,
        };
        (coordinator, event_rx)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// `true` only when a connection is active **and** authenticated.
    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(ConnectionHandler::is_authenticated)
    }

    pub fn is_connecting(&self) -> bool {
        self.is_connecting
    }

    /// `true` while a connection is active or an outgoing attempt is running.
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.is_connecting
    }

    pub fn connected_peer(&self) -> Option<&Peer> {
        self.connected_peer.as_ref()
    }

    pub fn pending_peer(&self) -> Option<&Peer> {
        self.pending_peer.as_ref()
    }

    pub fn active_connection_id(&self) -> Option<&ConnectionId> {
        self.active.as_ref().map(ConnectionHandler::connection_id)
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    /// Starts an outgoing attempt to `peer` unless the coordinator is busy.
    ///
    /// Returns `true` if a [`CoordinatorEvent::ConnectRequest`] was emitted.
    pub fn initiate_connection(&mut self, peer: Peer) -> bool {
        if self.active.is_some() {
            debug!(%peer, "already have an active connection; not dialling");
            return false;
        }
        if self.is_connecting {
            debug!(%peer, "connection attempt already in progress; not dialling");
            return false;
        }

        info!(%peer, "connecting");
        self.is_connecting = true;
        self.pending_peer = Some(peer.clone());
        self.emit(CoordinatorEvent::ConnectRequest(peer));
        true
    }

    /// Admits the socket opened for the pending attempt.
    ///
    /// A socket that does not belong to the pending attempt is destroyed and
    /// the pending state is left untouched.
    pub fn register_outgoing_connection(&mut self, mut socket: S, peer: Peer) {
        if !self.is_pending(&peer) {
            warn!(
                %peer,
                connection = %socket.connection_id(),
                "outgoing socket does not match the pending attempt; closing it"
            );
            socket.destroy();
            return;
        }

        self.is_connecting = false;
        self.pending_peer = None;
        let handler =
            ConnectionHandler::new(socket, AuthRole::Initiator, Some(peer), self.max_frame_bytes);
        self.wire(handler);
    }

    /// Admits an accepted socket unless a connection is active or an
    /// outgoing attempt is in progress.
    pub fn register_incoming_connection(&mut self, mut socket: S) {
        if self.is_busy() {
            info!(
                connection = %socket.connection_id(),
                "rejecting incoming connection; already busy"
            );
            socket.destroy();
            return;
        }

        let handler =
            ConnectionHandler::new(socket, AuthRole::Responder, None, self.max_frame_bytes);
        self.wire(handler);
    }

    /// Reports that the pending outgoing attempt could not connect.
    ///
    /// Ignored unless `peer` is the pending peer.
    pub fn handle_connection_failure(&mut self, peer: Peer, error: String) {
        if !self.is_pending(&peer) {
            debug!(%peer, "failure for an attempt that is no longer pending: {error}");
            return;
        }

        warn!(%peer, "connection failed: {error}");
        self.is_connecting = false;
        self.pending_peer = None;
        self.emit(CoordinatorEvent::ConnectionFailed { peer, error });
    }

    /// Closes the active connection.  No-op when there is none.
    pub fn disconnect(&mut self, reason: Option<String>) {
        if self.teardown().is_some() {
            let reason = reason.unwrap_or_else(|| REASON_LOCAL_DISCONNECT.to_string());
            info!("disconnected: {reason}");
            self.emit(CoordinatorEvent::Disconnected { reason });
        }
    }

    // ── Socket events ─────────────────────────────────────────────────────────

    /// Feeds bytes received on `connection_id`.
    pub fn handle_data(&mut self, connection_id: &ConnectionId, chunk: &[u8]) {
        if !self.is_active(connection_id) {
            debug!(connection = %connection_id, "data for inactive connection ignored");
            return;
        }

        let lines = match self.active.as_mut().map(|h| h.frames(chunk)) {
            Some(Ok(lines)) => lines,
            Some(Err(e)) => {
                self.disconnect(Some(format!("Protocol error: {e}")));
                return;
            }
            None => return,
        };

        for line in lines {
            // A line may end the connection (auth failure); stop once it has.
            if !self.is_active(connection_id) {
                break;
            }
            let routed = match self.active.as_ref() {
                Some(handler) => handler.route_line(&line, &mut self.auth),
                None => break,
            };
            match routed {
                Ok(Some(envelope)) => self.emit(CoordinatorEvent::MessageReceived {
                    connection_id: connection_id.clone(),
                    envelope,
                }),
                Ok(None) => {}
                Err(e) => warn!(connection = %connection_id, "failed to route line: {e}"),
            }
            self.pump_auth_events();
        }
    }

    /// The remote side closed `connection_id`.
    pub fn handle_closed(&mut self, connection_id: &ConnectionId) {
        if !self.is_active(connection_id) {
            debug!(connection = %connection_id, "close of inactive connection ignored");
            return;
        }
        self.disconnect(Some(REASON_CLOSED_BY_PEER.to_string()));
    }

    /// `connection_id` reported an I/O error.  The connection is closed.
    pub fn handle_socket_error(&mut self, connection_id: &ConnectionId, error: &str) {
        if !self.is_active(connection_id) {
            debug!(connection = %connection_id, "error on inactive connection ignored: {error}");
            return;
        }
        self.disconnect(Some(format!("Connection error: {error}")));
    }

    // ── Handshake plumbing ────────────────────────────────────────────────────

    /// Delivers a fired handshake timer.
    pub fn handle_auth_timeout(&mut self, fired: TimerFired) {
        self.auth.handle_timeout(fired);
        self.pump_auth_events();
    }

    /// Delivers the local user's names (or `None` for a cancelled prompt).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Auth`] if the response cannot be encoded.
    pub fn submit_secret(
        &mut self,
        connection_id: &ConnectionId,
        secret: Option<Secret>,
    ) -> Result<(), CoordinatorError> {
        let result = self.auth.submit_secret(connection_id, secret);
        self.pump_auth_events();
        Ok(result?)
    }

    /// Sends an application envelope on the authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotConnected`] unless [`is_connected`](Self::is_connected),
    /// or [`CoordinatorError::Handler`] if the socket refused the bytes.
    pub fn send_message(&mut self, envelope: &Envelope) -> Result<(), CoordinatorError> {
        match self.active.as_ref() {
            Some(handler) if handler.is_authenticated() => Ok(handler.send(envelope)?),
            _ => Err(CoordinatorError::NotConnected),
        }
    }

    /// Applies every queued [`AuthEvent`].  Events for connections other
    /// than the active one are stale and dropped.
    pub fn pump_auth_events(&mut self) {
        while let Ok(event) = self.auth_rx.try_recv() {
            if !self.is_active(event.connection_id()) {
                debug!(connection = %event.connection_id(), "stale auth event ignored");
                continue;
            }

            match event {
                AuthEvent::Authenticated { connection_id } => {
                    if let Some(handler) = self.active.as_mut() {
                        handler.mark_authenticated();
                    }
                    info!(connection = %connection_id, "authenticated");
                    self.emit(CoordinatorEvent::Connected {
                        connection_id,
                        peer: self.connected_peer.clone(),
                    });
                }
                AuthEvent::Failed {
                    connection_id,
                    reason,
                } => {
                    warn!(connection = %connection_id, "authentication failed: {reason}");
                    self.teardown();
                    self.emit(CoordinatorEvent::AuthFailed {
                        connection_id,
                        reason,
                    });
                }
                AuthEvent::SecretRequested { connection_id } => {
                    self.emit(CoordinatorEvent::SecretRequested { connection_id });
                }
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn wire(&mut self, handler: ConnectionHandler<S>) {
        let connection_id = handler.connection_id().clone();
        info!(connection = %connection_id, role = ?handler.role(), "connection admitted");

        self.connected_peer = handler.peer().cloned();
        self.active = Some(handler);

        let started = match self.active.as_ref() {
            Some(handler) => handler.start_authentication(&mut self.auth),
            None => return,
        };
        if let Err(e) = started {
            self.disconnect(Some(format!("Failed to start authentication: {e}")));
            return;
        }
        self.pump_auth_events();
    }

    /// Drops the active connection and its handshake.  Returns its id.
    fn teardown(&mut self) -> Option<ConnectionId> {
        let handler = self.active.take()?;
        let connection_id = handler.connection_id().clone();
        self.auth.cleanup_connection(&connection_id);
        handler.disconnect();
        self.connected_peer = None;
        Some(connection_id)
    }

    fn is_active(&self, connection_id: &ConnectionId) -> bool {
        self.active_connection_id() == Some(connection_id)
    }

    fn is_pending(&self, peer: &Peer) -> bool {
        self.is_connecting
            && self
                .pending_peer
                .as_ref()
                .is_some_and(|pending| pending.same_instance(peer))
    }

    fn emit(&self, event: CoordinatorEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("coordinator event receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection_handler::MockPeerSocket;
    use crate::application::test_support::{auth_manager, RecordingSocket, SocketLog};
    use lanchat_core::protocol::codec::{encode_auth_message, encode_frame, to_payload};
    use lanchat_core::protocol::messages::{ChatMessage, CHAT_MESSAGE};
    use lanchat_core::{AuthMessage, TimerHandle};
    use uuid::Uuid;

    type Coordinator = ActiveConnectionCoordinator<RecordingSocket>;
    type Events = mpsc::UnboundedReceiver<CoordinatorEvent>;

    fn coordinator() -> (Coordinator, Events) {
        let (auth, auth_rx) = auth_manager(Some(Secret::parse("lion,tiger,bear")));
        ActiveConnectionCoordinator::new(auth, auth_rx, 64 * 1024)
    }

    fn peer(name: &str) -> Peer {
        Peer::new(Uuid::new_v4(), name, "192.168.1.20:7878".parse().unwrap())
    }

    fn drain(rx: &mut Events) -> Vec<CoordinatorEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn auth_bytes(msg: &AuthMessage) -> Vec<u8> {
        encode_auth_message(msg).unwrap()
    }

    fn chat_bytes(text: &str) -> Vec<u8> {
        let payload = to_payload(&ChatMessage {
            sender: "remote".into(),
            text: text.into(),
            timestamp_ms: 1,
        })
        .unwrap();
        encode_frame(&Envelope::with_payload(CHAT_MESSAGE, payload)).unwrap()
    }

    /// Accepts an inbound socket and completes the responder handshake.
    fn authenticated_inbound(c: &mut Coordinator, id: &str) -> SocketLog {
        let (socket, log) = RecordingSocket::new(id);
        c.register_incoming_connection(socket);
        let names = vec!["lion".into(), "tiger".into(), "bear".into()];
        c.handle_data(
            &ConnectionId::from(id),
            &auth_bytes(&AuthMessage::Response { names }),
        );
        log
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    #[test]
    fn test_initiate_connection_emits_connect_request() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        let p = peer("bob");

        // Act
        let started = c.initiate_connection(p.clone());

        // Assert
        assert!(started);
        assert!(c.is_connecting());
        assert_eq!(c.pending_peer(), Some(&p));
        assert_eq!(drain(&mut rx), vec![CoordinatorEvent::ConnectRequest(p)]);
    }

    #[test]
    fn test_second_initiate_is_ignored_while_connecting() {
        let (mut c, mut rx) = coordinator();
        let first = peer("bob");
        c.initiate_connection(first.clone());
        drain(&mut rx);

        let started = c.initiate_connection(peer("carol"));

        assert!(!started);
        assert_eq!(c.pending_peer(), Some(&first));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_outgoing_socket_for_other_peer_is_destroyed_and_pending_kept() {
        // Arrange
        let (mut c, _rx) = coordinator();
        let pending = peer("bob");
        c.initiate_connection(pending.clone());
        let (socket, log) = RecordingSocket::new("out-x");

        // Act
        c.register_outgoing_connection(socket, peer("mallory"));

        // Assert
        assert_eq!(log.destroy_count(), 1);
        assert!(c.is_connecting());
        assert_eq!(c.pending_peer(), Some(&pending));
        assert_eq!(c.active_connection_id(), None);
    }

    #[test]
    fn test_outgoing_socket_without_attempt_is_destroyed() {
        let (mut c, _rx) = coordinator();
        let (socket, log) = RecordingSocket::new("out-x");

        c.register_outgoing_connection(socket, peer("bob"));

        assert_eq!(log.destroy_count(), 1);
        assert!(!c.is_busy());
    }

    #[test]
    fn test_matching_outgoing_socket_becomes_active_initiator() {
        // Arrange
        let (mut c, _rx) = coordinator();
        let p = peer("bob");
        c.initiate_connection(p.clone());
        let (socket, log) = RecordingSocket::new("out-1");

        // Act
        c.register_outgoing_connection(socket, p.clone());

        // Assert
        assert!(!c.is_connecting());
        assert_eq!(c.pending_peer(), None);
        assert_eq!(c.active_connection_id(), Some(&ConnectionId::from("out-1")));
        assert_eq!(c.connected_peer(), Some(&p));
        assert!(log.sent_lines().is_empty(), "initiator speaks second");
        assert!(!c.is_connected());
    }

    #[test]
    fn test_incoming_connection_is_rejected_while_connecting() {
        // Arrange
        let (auth, auth_rx) = auth_manager(None);
        let (mut c, _rx): (ActiveConnectionCoordinator<MockPeerSocket>, _) =
            ActiveConnectionCoordinator::new(auth, auth_rx, 1024);
        c.initiate_connection(peer("bob"));
        let mut socket = MockPeerSocket::new();
        socket
            .expect_connection_id()
            .return_const(ConnectionId::from("in-late"));
        socket.expect_destroy().times(1).return_const(());

        // Act
        c.register_incoming_connection(socket);

        // Assert
        assert_eq!(c.active_connection_id(), None);
        assert!(c.is_connecting());
    }

    #[test]
    fn test_only_one_connection_is_ever_active() {
        // Arrange
        let (mut c, _rx) = coordinator();
        let (first, first_log) = RecordingSocket::new("in-1");
        let (second, second_log) = RecordingSocket::new("in-2");

        // Act
        c.register_incoming_connection(first);
        c.register_incoming_connection(second);
        let dialled = c.initiate_connection(peer("bob"));

        // Assert
        assert_eq!(c.active_connection_id(), Some(&ConnectionId::from("in-1")));
        assert_eq!(first_log.destroy_count(), 0);
        assert_eq!(second_log.destroy_count(), 1);
        assert!(!dialled);
        assert_eq!(first_log.sent_auth(), vec![AuthMessage::Request]);
    }

    #[test]
    fn test_connection_failure_clears_pending_and_reports() {
        let (mut c, mut rx) = coordinator();
        let p = peer("bob");
        c.initiate_connection(p.clone());
        drain(&mut rx);

        c.handle_connection_failure(p.clone(), "refused".into());

        assert!(!c.is_connecting());
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::ConnectionFailed {
                peer: p,
                error: "refused".into()
            }]
        );
    }

    #[test]
    fn test_connection_failure_for_other_peer_is_ignored() {
        let (mut c, mut rx) = coordinator();
        let p = peer("bob");
        c.initiate_connection(p.clone());
        drain(&mut rx);

        c.handle_connection_failure(peer("carol"), "refused".into());

        assert!(c.is_connecting());
        assert_eq!(c.pending_peer(), Some(&p));
        assert!(drain(&mut rx).is_empty());
    }

    // ── Handshake outcomes ────────────────────────────────────────────────────

    #[test]
    fn test_inbound_handshake_success_emits_connected_without_peer() {
        // Arrange
        let (mut c, mut rx) = coordinator();

        // Act
        let log = authenticated_inbound(&mut c, "in-1");

        // Assert
        assert!(c.is_connected());
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::Connected {
                connection_id: ConnectionId::from("in-1"),
                peer: None
            }]
        );
        assert_eq!(
            log.sent_auth(),
            vec![AuthMessage::Request, AuthMessage::Success]
        );
    }

    #[test]
    fn test_handshake_failure_tears_down_and_reports() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        let (socket, log) = RecordingSocket::new("in-1");
        c.register_incoming_connection(socket);

        // Act
        c.handle_data(
            &ConnectionId::from("in-1"),
            &auth_bytes(&AuthMessage::Response {
                names: vec!["cat".into(), "dog".into(), "fish".into()],
            }),
        );

        // Assert
        assert_eq!(c.active_connection_id(), None);
        assert_eq!(log.destroy_count(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::AuthFailed {
                connection_id: ConnectionId::from("in-1"),
                reason: "Names do not match".into()
            }]
        );
    }

    #[test]
    fn test_initiator_secret_request_is_forwarded_and_answer_sent() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        let p = peer("bob");
        c.initiate_connection(p.clone());
        let (socket, log) = RecordingSocket::new("out-1");
        c.register_outgoing_connection(socket, p.clone());
        drain(&mut rx);
        let id = ConnectionId::from("out-1");

        // Act
        c.handle_data(&id, &auth_bytes(&AuthMessage::Request));
        let requested = drain(&mut rx);
        c.submit_secret(&id, Some(Secret::parse("lion,tiger,bear")))
            .unwrap();
        c.handle_data(&id, &auth_bytes(&AuthMessage::Success));

        // Assert
        assert_eq!(
            requested,
            vec![CoordinatorEvent::SecretRequested {
                connection_id: id.clone()
            }]
        );
        assert!(matches!(
            log.sent_auth().as_slice(),
            [AuthMessage::Response { .. }]
        ));
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::Connected {
                connection_id: id,
                peer: Some(p)
            }]
        );
    }

    #[test]
    fn test_timeout_on_active_connection_reports_auth_failed() {
        let (mut c, mut rx) = coordinator();
        let (socket, log) = RecordingSocket::new("in-1");
        c.register_incoming_connection(socket);

        // InertTimer hands out handles starting at 0.
        c.handle_auth_timeout(TimerFired {
            connection_id: ConnectionId::from("in-1"),
            handle: TimerHandle(0),
        });

        assert_eq!(log.destroy_count(), 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [CoordinatorEvent::AuthFailed { reason, .. }] if reason == "Authentication timed out"
        ));
    }

    #[test]
    fn test_chat_in_same_chunk_as_success_is_delivered() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        let p = peer("bob");
        c.initiate_connection(p.clone());
        let (socket, _log) = RecordingSocket::new("out-1");
        c.register_outgoing_connection(socket, p);
        let id = ConnectionId::from("out-1");
        c.handle_data(&id, &auth_bytes(&AuthMessage::Request));
        c.submit_secret(&id, Some(Secret::parse("lion,tiger,bear")))
            .unwrap();
        drain(&mut rx);

        // Act
        let mut chunk = auth_bytes(&AuthMessage::Success);
        chunk.extend_from_slice(&chat_bytes("hello"));
        c.handle_data(&id, &chunk);

        // Assert
        let events = drain(&mut rx);
        assert!(matches!(events[0], CoordinatorEvent::Connected { .. }));
        assert!(matches!(
            &events[1],
            CoordinatorEvent::MessageReceived { envelope, .. } if envelope.kind == CHAT_MESSAGE
        ));
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    #[test]
    fn test_close_of_active_connection_reports_disconnected() {
        let (mut c, mut rx) = coordinator();
        let log = authenticated_inbound(&mut c, "in-1");
        drain(&mut rx);

        c.handle_closed(&ConnectionId::from("in-1"));

        assert!(!c.is_connected());
        assert_eq!(log.destroy_count(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::Disconnected {
                reason: REASON_CLOSED_BY_PEER.into()
            }]
        );
    }

    #[test]
    fn test_socket_error_forces_disconnect() {
        let (mut c, mut rx) = coordinator();
        let log = authenticated_inbound(&mut c, "in-1");
        drain(&mut rx);

        c.handle_socket_error(&ConnectionId::from("in-1"), "reset by peer");

        assert_eq!(log.destroy_count(), 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [CoordinatorEvent::Disconnected { reason }] if reason.contains("reset by peer")
        ));
    }

    #[test]
    fn test_events_for_rejected_socket_are_ignored() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        authenticated_inbound(&mut c, "in-1");
        let (late, _late_log) = RecordingSocket::new("in-2");
        c.register_incoming_connection(late);
        drain(&mut rx);

        // Act
        c.handle_closed(&ConnectionId::from("in-2"));
        c.handle_data(&ConnectionId::from("in-2"), &chat_bytes("sneaky"));
        let dial_started = c.initiate_connection(peer("bob"));

        // Assert
        assert!(!dial_started);
        assert!(c.is_connected());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_initiate_connection_refused_while_authenticated() {
        // Arrange
        let (mut c, mut rx) = coordinator();
        authenticated_inbound(&mut c, "in-1");
        drain(&mut rx);

        // Act
        let started = c.initiate_connection(peer("bob"));

        // Assert
        assert!(!started);
        assert!(!c.is_connecting());
        assert_eq!(c.pending_peer(), None);
        assert!(c.is_connected());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_without_active_connection_is_noop() {
        let (mut c, mut rx) = coordinator();

        c.disconnect(Some("bye".into()));

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_during_handshake_ignores_late_auth_events() {
        let (mut c, mut rx) = coordinator();
        let (socket, log) = RecordingSocket::new("in-1");
        c.register_incoming_connection(socket);

        c.disconnect(None);
        c.pump_auth_events();

        assert_eq!(log.destroy_count(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![CoordinatorEvent::Disconnected {
                reason: REASON_LOCAL_DISCONNECT.into()
            }]
        );
    }

    #[test]
    fn test_oversized_frame_disconnects() {
        let (auth, auth_rx) = auth_manager(Some(Secret::parse("a,b,c")));
        let (mut c, mut rx) = ActiveConnectionCoordinator::new(auth, auth_rx, 16);
        let (socket, log) = RecordingSocket::new("in-1");
        c.register_incoming_connection(socket);

        c.handle_data(&ConnectionId::from("in-1"), &[b'x'; 64]);

        assert_eq!(log.destroy_count(), 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [CoordinatorEvent::Disconnected { reason }] if reason.starts_with("Protocol error")
        ));
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    #[test]
    fn test_send_message_requires_authenticated_connection() {
        let (mut c, _rx) = coordinator();
        let (socket, _log) = RecordingSocket::new("in-1");
        c.register_incoming_connection(socket);

        let result = c.send_message(&Envelope::bare(CHAT_MESSAGE));

        assert!(matches!(result, Err(CoordinatorError::NotConnected)));
    }

    #[test]
    fn test_send_message_writes_frame_when_connected() {
        let (mut c, _rx) = coordinator();
        let log = authenticated_inbound(&mut c, "in-1");

        c.send_message(&Envelope::bare(CHAT_MESSAGE)).unwrap();

        assert_eq!(
            log.sent_lines().last().map(String::as_str),
            Some(r#"{"type":"CHAT_MESSAGE"}"#)
        );
    }
}
