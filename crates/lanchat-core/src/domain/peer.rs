//! Connection and peer identity types.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a running chat node, derived from UUID v4.
///
/// Each node generates one at startup and advertises it in its discovery
/// announcements, which is how a node recognises (and ignores) its own
/// broadcasts.
pub type InstanceId = Uuid;

/// Opaque identifier for one physical connection attempt.
///
/// Created when a socket is accepted or an outbound connect succeeds, and
/// retired when that connection closes.  Two connections to the same peer
/// always get different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat node learned about through discovery (or named on the command line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The instance id the peer advertised.
    pub instance_id: InstanceId,
    /// Human-readable name shown in chat output.
    pub name: String,
    /// Address of the peer's TCP chat listener.
    pub address: SocketAddr,
}

impl Peer {
    pub fn new(instance_id: InstanceId, name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            instance_id,
            name: name.into(),
            address,
        }
    }

    /// Returns `true` if both values describe the same node instance.
    ///
    /// Only the instance id is compared; a peer that changed its name or port
    /// between announcements is still the same peer.
    pub fn same_instance(&self, other: &Peer) -> bool {
        self.instance_id == other.instance_id
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
