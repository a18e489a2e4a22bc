//! Hand-written doubles shared by the application layer unit tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanchat_core::protocol::codec::decode_auth_message;
use lanchat_core::{
    AuthConfig, AuthEvent, AuthManager, AuthMessage, ConnectionId, Secret, SendFn, Timer,
    TimerHandle,
};
use tokio::sync::mpsc;

use crate::application::connection_handler::PeerSocket;

/// What a [`RecordingSocket`] saw.  Cloned out before the socket is moved
/// into a handler.
#[derive(Clone, Default)]
pub(crate) struct SocketLog {
    sent: Arc<Mutex<Vec<u8>>>,
    destroyed: Arc<AtomicUsize>,
}

impl SocketLog {
    pub(crate) fn sent_lines(&self) -> Vec<String> {
        let bytes = self.sent.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn sent_auth(&self) -> Vec<AuthMessage> {
        self.sent_lines()
            .iter()
            .filter_map(|l| decode_auth_message(l).ok())
            .collect()
    }

    pub(crate) fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Socket double that records written bytes and `destroy()` calls.
pub(crate) struct RecordingSocket {
    id: ConnectionId,
    log: SocketLog,
    accepts_sends: bool,
}

impl RecordingSocket {
    pub(crate) fn new(id: &str) -> (Self, SocketLog) {
        let log = SocketLog::default();
        let socket = Self {
            id: ConnectionId::from(id),
            log: log.clone(),
            accepts_sends: true,
        };
        (socket, log)
    }

    /// A socket whose sender always reports failure.
    pub(crate) fn refusing(id: &str) -> (Self, SocketLog) {
        let (mut socket, log) = Self::new(id);
        socket.accepts_sends = false;
        (socket, log)
    }
}

impl PeerSocket for RecordingSocket {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn sender(&self) -> SendFn {
        let sent = Arc::clone(&self.log.sent);
        let accepts = self.accepts_sends;
        Arc::new(move |_id: &ConnectionId, bytes: &[u8]| {
            if accepts {
                sent.lock().unwrap().extend_from_slice(bytes);
            }
            accepts
        })
    }

    fn destroy(&mut self) {
        self.log.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Timer that hands out increasing handles and never fires.
#[derive(Default)]
pub(crate) struct InertTimer {
    next: AtomicU64,
}

impl Timer for InertTimer {
    fn set(&self, _connection_id: &ConnectionId, _delay: Duration) -> TimerHandle {
        TimerHandle(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn clear(&self, _handle: TimerHandle) {}
}

pub(crate) fn auth_manager(
    local_secret: Option<Secret>,
) -> (AuthManager, mpsc::UnboundedReceiver<AuthEvent>) {
    AuthManager::with_config(
        AuthConfig::default(),
        local_secret,
        Arc::new(InertTimer::default()),
    )
}
