//! AuthManager: one [`AuthProcess`] per connection, keyed by [`ConnectionId`].
//!
//! The manager owns every live process.  Callers feed it raw handshake lines,
//! secrets, and fired timers; it routes each input to the right process and
//! publishes the outcome as an [`AuthEvent`] on an unbounded channel.  Once a
//! process reaches a terminal state it is removed, so a connection is
//! authenticated at most once per `start_authentication` call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::process::AuthProcess;
use crate::auth::timer::{Timer, TimerFired};
use crate::auth::{
    AuthConfig, AuthError, AuthRole, AuthSignal, AuthState, SendFn, REASON_CONNECTION_CLOSED,
    REASON_INVALID_FORMAT, REASON_SUPERSEDED,
};
use crate::domain::peer::ConnectionId;
use crate::domain::secret::Secret;
use crate::protocol::codec::decode_auth_message;

/// Builds a fresh, unstarted process for a connection.
pub type ProcessFactory = Box<dyn Fn(ConnectionId, AuthRole, SendFn) -> AuthProcess + Send>;

/// Outcome notifications published by [`AuthManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The connection finished the handshake successfully.
    Authenticated { connection_id: ConnectionId },
    /// The handshake failed; the connection should be closed.
    Failed {
        connection_id: ConnectionId,
        reason: String,
    },
    /// The initiator was challenged; answer with [`AuthManager::submit_secret`].
    SecretRequested { connection_id: ConnectionId },
}

impl AuthEvent {
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            AuthEvent::Authenticated { connection_id }
            | AuthEvent::Failed { connection_id, .. }
            | AuthEvent::SecretRequested { connection_id } => connection_id,
        }
    }
}

/// Registry of in-flight handshakes.
pub struct AuthManager {
    processes: HashMap<ConnectionId, AuthProcess>,
    factory: ProcessFactory,
    event_tx: mpsc::UnboundedSender<AuthEvent>,
}

impl AuthManager {
    /// Creates a manager that builds processes with `factory`.
    ///
    /// Returns the manager and the receiver for its [`AuthEvent`]s.
    pub fn new(factory: ProcessFactory) -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Self {
            processes: HashMap::new(),
            factory,
            event_tx,
        };
        (manager, event_rx)
    }

    /// Creates a manager whose responders compare against `local_secret`.
    ///
    /// Initiators always start without a secret and obtain one through
    /// [`submit_secret`](Self::submit_secret).
    pub fn with_config(
        config: AuthConfig,
        local_secret: Option<Secret>,
        timer: Arc<dyn Timer>,
    ) -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let factory: ProcessFactory = Box::new(move |id, role, send| {
            let secret = match role {
                AuthRole::Responder => local_secret.clone(),
                AuthRole::Initiator => None,
            };
            AuthProcess::new(id, role, send, Arc::clone(&timer), config.clone(), secret)
        });
        Self::new(factory)
    }

    /// Creates and starts a process for `connection_id`.
    ///
    /// An existing process for the same id is aborted silently and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if the responder's challenge cannot be
    /// encoded; no process is registered in that case.
    pub fn start_authentication(
        &mut self,
        connection_id: ConnectionId,
        role: AuthRole,
        send: SendFn,
    ) -> Result<(), AuthError> {
        if let Some(mut old) = self.processes.remove(&connection_id) {
            debug!(connection = %connection_id, "replacing existing handshake");
            old.abort(REASON_SUPERSEDED);
        }

        let mut process = (self.factory)(connection_id.clone(), role, send);
        let signal = process.start()?;
        self.processes.insert(connection_id.clone(), process);

        if let Some(signal) = signal {
            self.dispatch(&connection_id, signal);
        }
        Ok(())
    }

    /// Routes one raw handshake line to its process.
    ///
    /// Lines for unknown connections are dropped.  A line that does not
    /// decode as a handshake message fails the process with
    /// `"Invalid message format"`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if a reply cannot be encoded.
    pub fn handle_message(&mut self, connection_id: &ConnectionId, raw: &str) -> Result<(), AuthError> {
        let Some(process) = self.processes.get_mut(connection_id) else {
            debug!(connection = %connection_id, "handshake line for unknown connection dropped");
            return Ok(());
        };

        let signal = match decode_auth_message(raw) {
            Ok(msg) => process.handle_message(msg)?,
            Err(e) => {
                warn!(connection = %connection_id, "undecodable handshake line: {e}");
                process.abort(REASON_INVALID_FORMAT)
            }
        };

        if let Some(signal) = signal {
            self.dispatch(connection_id, signal);
        }
        Ok(())
    }

    /// Delivers the initiator's names (or `None` for a cancelled prompt).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Encode`] if the response cannot be encoded.
    pub fn submit_secret(
        &mut self,
        connection_id: &ConnectionId,
        secret: Option<Secret>,
    ) -> Result<(), AuthError> {
        let Some(process) = self.processes.get_mut(connection_id) else {
            debug!(connection = %connection_id, "secret for finished handshake dropped");
            return Ok(());
        };

        if let Some(signal) = process.submit_secret(secret)? {
            self.dispatch(connection_id, signal);
        }
        Ok(())
    }

    /// Delivers a fired timer to its process.
    pub fn handle_timeout(&mut self, fired: TimerFired) {
        let Some(process) = self.processes.get_mut(&fired.connection_id) else {
            return;
        };
        if let Some(signal) = process.on_timeout(fired.handle) {
            self.dispatch(&fired.connection_id, signal);
        }
    }

    /// Aborts and forgets the process for a connection that went away.
    ///
    /// Publishes `Failed` with `"Connection closed"` if the handshake was
    /// still running.
    pub fn cleanup_connection(&mut self, connection_id: &ConnectionId) {
        let Some(mut process) = self.processes.remove(connection_id) else {
            return;
        };
        if let Some(AuthSignal::Failed { reason }) = process.abort(REASON_CONNECTION_CLOSED) {
            self.emit(AuthEvent::Failed {
                connection_id: connection_id.clone(),
                reason,
            });
        }
    }

    /// Current state of the process for `connection_id`, if one is live.
    pub fn state_of(&self, connection_id: &ConnectionId) -> Option<AuthState> {
        self.processes.get(connection_id).map(AuthProcess::state)
    }

    /// Number of live (non-terminal) processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    fn dispatch(&mut self, connection_id: &ConnectionId, signal: AuthSignal) {
        let event = match signal {
            AuthSignal::SecretRequired => AuthEvent::SecretRequested {
                connection_id: connection_id.clone(),
            },
            AuthSignal::Authenticated => {
                self.processes.remove(connection_id);
                AuthEvent::Authenticated {
                    connection_id: connection_id.clone(),
                }
            }
            AuthSignal::Failed { reason } => {
                self.processes.remove(connection_id);
                AuthEvent::Failed {
                    connection_id: connection_id.clone(),
                    reason,
                }
            }
        };
        self.emit(event);
    }

    fn emit(&self, event: AuthEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("auth event receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
