//! PeerNode: the event loop that owns the coordinator.
//!
//! Everything asynchronous (socket reads, timers, discovery, connect
//! attempts, secret prompts, console commands) runs in its own task or
//! thread and reports back over a channel.  [`PeerNode::run`] is the only
//! place that touches the [`ActiveConnectionCoordinator`] and the
//! `AuthManager` inside it, so neither needs a lock.
//!
//! ```text
//!  accept loop ──(TcpStream)──────┐
//!  socket tasks ──(SocketEvent)───┤
//!  TokioTimer ──(TimerFired)──────┤
//!  connect tasks ──(outcome)──────┼──► PeerNode::run ──► NodeNotification
//!  secret prompts ──(answer)──────┤         │
//!  discovery thread ──(Peer)──────┤         └─ coordinator ─ auth manager
//!  commands ──(NodeCommand)───────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lanchat_core::protocol::codec::{from_payload, to_payload};
use lanchat_core::protocol::messages::{Announcement, ChatMessage, CHAT_MESSAGE};
use lanchat_core::{
    AuthConfig, AuthManager, ConnectionId, Envelope, InstanceId, Peer, Secret, SecretProvider,
    Timer, TimerFired,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::connection_handler::PeerSocket;
use crate::application::coordinator::{ActiveConnectionCoordinator, CoordinatorEvent};
use crate::application::discovery_coordinator::AutoConnectDiscoveryCoordinator;
use crate::application::incoming_coordinator::IncomingConnectionCoordinator;
use crate::infrastructure::network::connector::connect_with_timeout;
use crate::infrastructure::network::discovery::{
    start_discovery, DiscoveryConfig, DiscoveryError, DiscoveryEvent,
};
use crate::infrastructure::network::listener::{bind_listener, run_accept_loop};
use crate::infrastructure::network::tcp_socket::{SocketEvent, TcpPeerSocket};
use crate::infrastructure::network::NetworkError;
use crate::infrastructure::timer::TokioTimer;

const SOCKET_EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 32;
const REASON_SHUTDOWN: &str = "Shutting down";

/// Error type for node startup and shutdown.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub instance_id: InstanceId,
    pub name: String,
    pub listen_addr: SocketAddr,
    /// `None` disables discovery; connections are then made by command only.
    pub discovery: Option<DiscoveryConfig>,
    pub connect_timeout: Duration,
    pub reconnect_cooldown: Duration,
    pub max_frame_bytes: usize,
    pub auth: AuthConfig,
    /// Names this node checks incoming connections against.
    pub local_secret: Option<Secret>,
}

/// Requests from the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    Connect(SocketAddr),
    Disconnect,
    /// Send a chat message on the active connection.
    Send(String),
    Status,
    Shutdown,
}

/// Snapshot returned for [`NodeCommand::Status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub listen_addr: SocketAddr,
    pub connected: bool,
    pub connecting: bool,
    /// The dialled peer; `None` for accepted connections and when idle.
    pub peer: Option<Peer>,
    pub connection_id: Option<ConnectionId>,
}

/// What the node reports to the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeNotification {
    Listening(SocketAddr),
    Connecting(Peer),
    /// A connect command was ignored because a connection exists or is pending.
    ConnectIgnored(SocketAddr),
    Connected { peer: Option<Peer> },
    Disconnected { reason: String },
    ConnectionFailed { peer: Peer, error: String },
    AuthFailed { reason: String },
    SecretRequested,
    Message(ChatMessage),
    SendRejected(String),
    Status(NodeStatus),
}

enum ConnectOutcome {
    Connected(Peer, TcpStream),
    Failed(Peer, String),
}

/// Receivers drained by [`PeerNode::run`].
struct Inbox {
    commands: mpsc::Receiver<NodeCommand>,
    sockets: mpsc::Receiver<SocketEvent>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    connects: mpsc::UnboundedReceiver<ConnectOutcome>,
    secrets: mpsc::UnboundedReceiver<(ConnectionId, Option<Secret>)>,
    coordinator: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

/// State mutated by [`PeerNode::run`].
struct NodeState {
    settings: NodeSettings,
    local_addr: SocketAddr,
    coordinator: ActiveConnectionCoordinator<TcpPeerSocket>,
    discovery: AutoConnectDiscoveryCoordinator,
    incoming: IncomingConnectionCoordinator,
    provider: Arc<dyn SecretProvider>,
    notify: mpsc::UnboundedSender<NodeNotification>,
    socket_tx: mpsc::Sender<SocketEvent>,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    secret_tx: mpsc::UnboundedSender<(ConnectionId, Option<Secret>)>,
    /// Open secret prompts.  Aborting one drops its console slot.
    prompts: HashMap<ConnectionId, JoinHandle<()>>,
}

/// A bound, not yet running chat node.
pub struct PeerNode {
    state: NodeState,
    inbox: Inbox,
    listener: TcpListener,
}

impl PeerNode {
    /// Binds the chat listener and wires the coordinator.
    ///
    /// Returns the node, the command sender, and the notification receiver.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Network`] if the listen address cannot be bound.
    pub async fn bind(
        settings: NodeSettings,
        provider: Arc<dyn SecretProvider>,
    ) -> Result<
        (
            Self,
            mpsc::Sender<NodeCommand>,
            mpsc::UnboundedReceiver<NodeNotification>,
        ),
        NodeError,
    > {
        let listener = bind_listener(settings.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let (timer, timers) = TokioTimer::new();
        let timer: Arc<dyn Timer> = timer;
        let (auth, auth_rx) =
            AuthManager::with_config(settings.auth.clone(), settings.local_secret.clone(), timer);
        let (coordinator, coordinator_rx) =
            ActiveConnectionCoordinator::new(auth, auth_rx, settings.max_frame_bytes);

        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (notify, notifications) = mpsc::unbounded_channel();
        let (socket_tx, sockets) = mpsc::channel(SOCKET_EVENT_CAPACITY);
        let (connect_tx, connects) = mpsc::unbounded_channel();
        let (secret_tx, secrets) = mpsc::unbounded_channel();

        let state = NodeState {
            discovery: AutoConnectDiscoveryCoordinator::new(
                settings.instance_id,
                settings.reconnect_cooldown,
            ),
            incoming: IncomingConnectionCoordinator::new(),
            settings,
            local_addr,
            coordinator,
            provider,
            notify,
            socket_tx,
            connect_tx,
            secret_tx,
            prompts: HashMap::new(),
        };
        let inbox = Inbox {
            commands,
            sockets,
            timers,
            connects,
            secrets,
            coordinator: coordinator_rx,
        };

        Ok((
            Self {
                state,
                inbox,
                listener,
            },
            command_tx,
            notifications,
        ))
    }

    /// The bound chat address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    /// Runs until [`NodeCommand::Shutdown`] or the command sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Discovery`] if discovery is enabled and its socket
    /// cannot be set up.
    pub async fn run(self) -> Result<(), NodeError> {
        let PeerNode {
            mut state,
            mut inbox,
            listener,
        } = self;
        let running = Arc::new(AtomicBool::new(true));

        let mut discovered = match state.settings.discovery.clone() {
            Some(config) => {
                let local = Announcement {
                    instance_id: state.settings.instance_id,
                    name: state.settings.name.clone(),
                    port: state.local_addr.port(),
                };
                Some(start_discovery(config, local, Arc::clone(&running))?)
            }
            None => None,
        };

        let (accept_tx, mut accepted) = mpsc::channel(16);
        tokio::spawn(run_accept_loop(listener, accept_tx, Arc::clone(&running)));

        info!(
            instance = %state.settings.instance_id,
            name = %state.settings.name,
            "node listening on {}", state.local_addr
        );
        state.emit(NodeNotification::Listening(state.local_addr));

        loop {
            tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(NodeCommand::Shutdown) | None => break,
                    Some(command) => state.on_command(command),
                },
                Some((stream, addr)) = accepted.recv() => state.on_accepted(stream, addr),
                Some(event) = inbox.sockets.recv() => state.on_socket_event(event),
                Some(fired) = inbox.timers.recv() => state.coordinator.handle_auth_timeout(fired),
                Some(outcome) = inbox.connects.recv() => state.on_connect_outcome(outcome),
                Some((id, secret)) = inbox.secrets.recv() => state.on_secret(id, secret),
                event = recv_optional(&mut discovered) => match event {
                    Some(event) => state.on_discovered(event),
                    None => discovered = None,
                },
            }
            state.drain(&mut inbox.coordinator);
        }

        running.store(false, Ordering::Relaxed);
        state
            .coordinator
            .disconnect(Some(REASON_SHUTDOWN.to_string()));
        state.drain(&mut inbox.coordinator);
        info!("node stopped");
        Ok(())
    }
}

/// Receives from `rx`, or waits forever if there is none.
async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl NodeState {
    fn on_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Connect(addr) => {
                // Manual targets have no announced identity; a fresh id keeps
                // them distinct from every discovered peer.
                let peer = Peer::new(Uuid::new_v4(), addr.to_string(), addr);
                if !self.coordinator.initiate_connection(peer) {
                    self.emit(NodeNotification::ConnectIgnored(addr));
                }
            }
            NodeCommand::Disconnect => self.coordinator.disconnect(None),
            NodeCommand::Send(text) => {
                if let Err(e) = self.send_chat(text) {
                    self.emit(NodeNotification::SendRejected(e));
                }
            }
            NodeCommand::Status => {
                let status = self.status();
                self.emit(NodeNotification::Status(status));
            }
            NodeCommand::Shutdown => {}
        }
    }

    fn send_chat(&mut self, text: String) -> Result<(), String> {
        let message = ChatMessage {
            sender: self.settings.name.clone(),
            text,
            timestamp_ms: now_ms(),
        };
        let payload = to_payload(&message).map_err(|e| e.to_string())?;
        self.coordinator
            .send_message(&Envelope::with_payload(CHAT_MESSAGE, payload))
            .map_err(|e| e.to_string())
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            name: self.settings.name.clone(),
            listen_addr: self.local_addr,
            connected: self.coordinator.is_connected(),
            connecting: self.coordinator.is_connecting(),
            peer: self
                .coordinator
                .connected_peer()
                .or(self.coordinator.pending_peer())
                .cloned(),
            connection_id: self.coordinator.active_connection_id().cloned(),
        }
    }

    fn on_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        match TcpPeerSocket::spawn(stream, self.socket_tx.clone()) {
            Ok(socket) => {
                info!(
                    connection = %socket.connection_id(),
                    "incoming connection from {}",
                    socket.peer_addr()
                );
                self.incoming
                    .on_connection_accepted(socket, &mut self.coordinator)
            }
            Err(e) => warn!("dropping connection from {addr}: {e}"),
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Data {
                connection_id,
                bytes,
            } => self.coordinator.handle_data(&connection_id, &bytes),
            SocketEvent::Closed { connection_id } => self.coordinator.handle_closed(&connection_id),
            SocketEvent::Error {
                connection_id,
                error,
            } => self.coordinator.handle_socket_error(&connection_id, &error),
        }
    }

    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        match outcome {
            ConnectOutcome::Connected(peer, stream) => {
                match TcpPeerSocket::spawn(stream, self.socket_tx.clone()) {
                    Ok(socket) => {
                        info!(
                            connection = %socket.connection_id(),
                            "connected to {}",
                            socket.peer_addr()
                        );
                        self.coordinator.register_outgoing_connection(socket, peer)
                    }
                    Err(e) => self.coordinator.handle_connection_failure(peer, e.to_string()),
                }
            }
            ConnectOutcome::Failed(peer, error) => {
                self.coordinator.handle_connection_failure(peer, error)
            }
        }
    }

    fn on_secret(&mut self, connection_id: ConnectionId, secret: Option<Secret>) {
        self.prompts.remove(&connection_id);
        if let Err(e) = self.coordinator.submit_secret(&connection_id, secret) {
            warn!(connection = %connection_id, "could not answer challenge: {e}");
        }
    }

    fn on_discovered(&mut self, event: DiscoveryEvent) {
        self.discovery
            .on_peer_discovered(event.peer, &mut self.coordinator);
    }

    /// Acts on everything the coordinator emitted.
    fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<CoordinatorEvent>) {
        while let Ok(event) = events.try_recv() {
            match event {
                CoordinatorEvent::ConnectRequest(peer) => self.spawn_connect(peer),
                CoordinatorEvent::Connected { peer, .. } => {
                    self.emit(NodeNotification::Connected { peer })
                }
                CoordinatorEvent::Disconnected { reason } => {
                    // At most one connection exists, so every open prompt is stale.
                    for (_, prompt) in self.prompts.drain() {
                        prompt.abort();
                    }
                    self.emit(NodeNotification::Disconnected { reason })
                }
                CoordinatorEvent::ConnectionFailed { peer, error } => {
                    self.emit(NodeNotification::ConnectionFailed { peer, error })
                }
                CoordinatorEvent::AuthFailed {
                    connection_id,
                    reason,
                } => {
                    if let Some(prompt) = self.prompts.remove(&connection_id) {
                        prompt.abort();
                    }
                    self.emit(NodeNotification::AuthFailed { reason })
                }
                CoordinatorEvent::SecretRequested { connection_id } => {
                    self.spawn_secret_request(connection_id);
                    self.emit(NodeNotification::SecretRequested);
                }
                CoordinatorEvent::MessageReceived { envelope, .. } => self.on_message(envelope),
            }
        }
    }

    fn on_message(&self, envelope: Envelope) {
        if envelope.kind != CHAT_MESSAGE {
            debug!(kind = %envelope.kind, "ignoring unsupported message type");
            return;
        }
        match from_payload::<ChatMessage>(&envelope) {
            Ok(message) => self.emit(NodeNotification::Message(message)),
            Err(e) => warn!("malformed chat message: {e}"),
        }
    }

    fn spawn_connect(&self, peer: Peer) {
        self.emit(NodeNotification::Connecting(peer.clone()));
        let tx = self.connect_tx.clone();
        let limit = self.settings.connect_timeout;
        tokio::spawn(async move {
            let outcome = match connect_with_timeout(peer.address, limit).await {
                Ok(stream) => ConnectOutcome::Connected(peer, stream),
                Err(e) => ConnectOutcome::Failed(peer, e.to_string()),
            };
            let _ = tx.send(outcome);
        });
    }

    fn spawn_secret_request(&mut self, connection_id: ConnectionId) {
        let provider = Arc::clone(&self.provider);
        let tx = self.secret_tx.clone();
        let id = connection_id.clone();
        let prompt = tokio::spawn(async move {
            let answer = provider.request_secret(&id).await;
            let _ = tx.send((id, answer));
        });
        if let Some(previous) = self.prompts.insert(connection_id, prompt) {
            previous.abort();
        }
    }

    fn emit(&self, notification: NodeNotification) {
        if self.notify.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanchat_core::StaticSecretProvider;

    fn settings() -> NodeSettings {
        NodeSettings {
            instance_id: Uuid::new_v4(),
            name: "alice".into(),
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            discovery: None,
            connect_timeout: Duration::from_secs(2),
            reconnect_cooldown: Duration::ZERO,
            max_frame_bytes: 64 * 1024,
            auth: AuthConfig::default(),
            local_secret: None,
        }
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let (node, _commands, _notes) =
            PeerNode::bind(settings(), Arc::new(StaticSecretProvider::cancelling()))
                .await
                .unwrap();

        assert_ne!(node.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_status_while_idle() {
        // Arrange
        let (node, commands, mut notes) =
            PeerNode::bind(settings(), Arc::new(StaticSecretProvider::cancelling()))
                .await
                .unwrap();
        let addr = node.local_addr();
        let task = tokio::spawn(node.run());

        // Act
        commands.send(NodeCommand::Status).await.unwrap();
        let listening = notes.recv().await;
        let status = notes.recv().await;
        commands.send(NodeCommand::Shutdown).await.unwrap();

        // Assert
        assert_eq!(listening, Some(NodeNotification::Listening(addr)));
        match status {
            Some(NodeNotification::Status(s)) => {
                assert_eq!(s.name, "alice");
                assert!(!s.connected && !s.connecting);
                assert_eq!(s.peer, None);
            }
            other => panic!("expected status, got {other:?}"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connection_is_rejected() {
        let (node, commands, mut notes) =
            PeerNode::bind(settings(), Arc::new(StaticSecretProvider::cancelling()))
                .await
                .unwrap();
        let task = tokio::spawn(node.run());

        commands.send(NodeCommand::Send("hi".into())).await.unwrap();
        notes.recv().await; // Listening
        let rejected = notes.recv().await;
        drop(commands);

        assert!(matches!(rejected, Some(NodeNotification::SendRejected(_))));
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
