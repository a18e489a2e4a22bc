//! AutoConnectDiscoveryCoordinator: turns discovery announcements into
//! connection attempts.
//!
//! Every node announces itself every few seconds, including to itself.  Two
//! filters stand between an announcement and a dial:
//!
//! 1. Our own announcements are ignored (same `instance_id`).
//! 2. A peer we tried recently is not tried again until the cooldown has
//!    passed.  Without this, a peer that refuses us (because it is busy)
//!    would be redialled on every broadcast.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lanchat_core::{InstanceId, Peer};
use tracing::debug;

use crate::application::connection_handler::PeerSocket;
use crate::application::coordinator::ActiveConnectionCoordinator;

/// Default minimum interval between dials to the same peer.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(10);

pub struct AutoConnectDiscoveryCoordinator {
    local_instance: InstanceId,
    cooldown: Duration,
    last_attempt: HashMap<InstanceId, Instant>,
}

impl AutoConnectDiscoveryCoordinator {
    /// `cooldown` of zero disables rate limiting.
    pub fn new(local_instance: InstanceId, cooldown: Duration) -> Self {
        Self {
            local_instance,
            cooldown,
            last_attempt: HashMap::new(),
        }
    }

    /// Handles one discovered peer.  Returns `true` if a connection attempt
    /// was started.
    pub fn on_peer_discovered<S: PeerSocket>(
        &mut self,
        peer: Peer,
        coordinator: &mut ActiveConnectionCoordinator<S>,
    ) -> bool {
        self.on_peer_discovered_at(peer, coordinator, Instant::now())
    }

    /// Same as [`on_peer_discovered`](Self::on_peer_discovered) with an
    /// explicit clock reading.
    pub fn on_peer_discovered_at<S: PeerSocket>(
        &mut self,
        peer: Peer,
        coordinator: &mut ActiveConnectionCoordinator<S>,
        now: Instant,
    ) -> bool {
        if peer.instance_id == self.local_instance {
            return false;
        }
        if coordinator.is_busy() {
            return false;
        }
        if let Some(last) = self.last_attempt.get(&peer.instance_id) {
            if now.saturating_duration_since(*last) < self.cooldown {
                debug!(%peer, "peer tried recently; waiting for cooldown");
                return false;
            }
        }

        let instance_id = peer.instance_id;
        let started = coordinator.initiate_connection(peer);
        if started && !self.cooldown.is_zero() {
            let cooldown = self.cooldown;
            self.last_attempt
                .retain(|_, last| now.saturating_duration_since(*last) < cooldown);
            self.last_attempt.insert(instance_id, now);
        }
        started
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
