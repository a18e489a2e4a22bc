//! IncomingConnectionCoordinator: hands accepted sockets to the
//! [`ActiveConnectionCoordinator`], which decides whether to keep them.

use tracing::debug;

use crate::application::connection_handler::PeerSocket;
use crate::application::coordinator::ActiveConnectionCoordinator;

#[derive(Debug, Default)]
pub struct IncomingConnectionCoordinator;

impl IncomingConnectionCoordinator {
    pub fn new() -> Self {
        Self
    }

    pub fn on_connection_accepted<S: PeerSocket>(
        &self,
        socket: S,
        coordinator: &mut ActiveConnectionCoordinator<S>,
    ) {
        debug!(connection = %socket.connection_id(), "incoming connection accepted");
        coordinator.register_incoming_connection(socket);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
