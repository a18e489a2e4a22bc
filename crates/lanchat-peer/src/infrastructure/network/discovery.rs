//! UDP broadcast-based peer discovery.
//!
//! Every node binds a UDP socket on the discovery port and, on a dedicated
//! thread:
//!
//! 1. Broadcasts its own `ANNOUNCE` datagram every `announce_interval`.
//! 2. Decodes announcements from other nodes and emits a [`DiscoveryEvent`]
//!    carrying the announcing [`Peer`].
//!
//! The peer's chat address is the datagram's source IP combined with the
//! port advertised in the announcement.  Our own broadcasts come back to us
//! too; they are forwarded like any other and filtered by the discovery
//! coordinator, which knows our instance id.
//!
//! # How UDP discovery works (for beginners)
//!
//! UDP is connectionless: a datagram sent to the LAN broadcast address
//! (e.g. `255.255.255.255`) on the discovery port reaches every host that is
//! listening on that port.  Nothing is acknowledged and datagrams may be
//! lost, which is fine because announcements repeat.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  `recv_from` therefore returns at
//! least twice a second, which is when the loop checks the `running` flag and
//! whether the next announcement is due.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use lanchat_core::protocol::codec::{decode_announcement, encode_announcement};
use lanchat_core::protocol::messages::Announcement;
use lanchat_core::{Peer, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_DATAGRAM_BYTES: usize = 2048;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket option could not be applied.
    #[error("failed to configure discovery socket: {0}")]
    Configure(#[source] std::io::Error),

    /// Our own announcement could not be encoded.
    #[error("failed to encode announcement: {0}")]
    Encode(#[from] ProtocolError),

    /// The discovery thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Where to listen and where to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local UDP address, normally `0.0.0.0:<discovery_port>`.
    pub bind_addr: SocketAddr,
    /// Destination for announcements, normally `255.255.255.255:<discovery_port>`.
    pub broadcast_addr: SocketAddr,
    pub announce_interval: Duration,
}

/// A node announced itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub peer: Peer,
}

/// Binds the discovery socket and starts the announce/receive thread.
///
/// The thread exits when `running` is cleared or the returned receiver is
/// dropped.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the port is unavailable, or
/// another variant if the socket or thread cannot be set up.
pub fn start_discovery(
    config: DiscoveryConfig,
    local: Announcement,
    running: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
    let addr = config.bind_addr;
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(DiscoveryError::Configure)?;
    socket
        .set_broadcast(true)
        .map_err(DiscoveryError::Configure)?;

    let datagram = encode_announcement(&local)?;
    let (tx, rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("lanchat-discovery".to_string())
        .spawn(move || discovery_loop(socket, datagram, config, tx, running))
        .map_err(DiscoveryError::Spawn)?;

    info!("discovery listening on UDP {addr}");
    Ok(rx)
}

/// The main loop executed on the discovery thread.
fn discovery_loop(
    socket: UdpSocket,
    datagram: Vec<u8>,
    config: DiscoveryConfig,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    let mut next_announce = Instant::now();

    while running.load(Ordering::Relaxed) {
        if Instant::now() >= next_announce {
            if let Err(e) = socket.send_to(&datagram, config.broadcast_addr) {
                warn!("failed to send announcement to {}: {e}", config.broadcast_addr);
            }
            next_announce = Instant::now() + config.announce_interval;
        }

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        let announcement = match decode_announcement(&buf[..len]) {
            Ok(a) => a,
            Err(e) => {
                debug!("ignoring datagram from {src}: {e}");
                continue;
            }
        };

        let peer = peer_from_announcement(announcement, src);
        debug!(%peer, instance = %peer.instance_id, "announcement received");
        if tx.blocking_send(DiscoveryEvent { peer }).is_err() {
            // Receiver dropped – node is shutting down.
            break;
        }
    }

    info!("discovery stopped");
}

/// Combines the datagram's source IP with the advertised chat port.
fn peer_from_announcement(announcement: Announcement, src: SocketAddr) -> Peer {
    Peer::new(
        announcement.instance_id,
        announcement.name,
        SocketAddr::new(src.ip(), announcement.port),
    )
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
