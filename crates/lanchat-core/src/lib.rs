//! # lanchat-core
//!
//! Shared library for LAN chat peers containing the wire protocol, the
//! stream framing layer, the shared-secret matching rules, and the pairing
//! handshake state machine.
//!
//! This crate has zero dependencies on sockets, UI, or the console.  Every
//! side effect (sending bytes, arming timers, asking the user for a secret)
//! goes through an injected seam, so the handshake can be driven entirely
//! from unit tests.
//!
//! # Architecture overview (for beginners)
//!
//! Two chat peers on the same LAN find each other through a UDP broadcast,
//! open one TCP connection, and must then prove that both humans typed the
//! same three animal names before any chat text flows.
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   JSON object `{"type": ..., "payload": ...}` terminated by `\n`.  The
//!   framing layer reassembles lines that arrive split across TCP reads.
//!
//! - **`domain`** – Plain data: connection identifiers, peer identities, and
//!   the [`Secret`] together with its comparison policy.
//!
//! - **`auth`** – The challenge/response handshake.  [`AuthProcess`] is the
//!   per-connection state machine; [`AuthManager`] owns one process per live
//!   connection and reports outcomes on a channel.

pub mod auth;
pub mod domain;
pub mod protocol;

pub use auth::{
    AuthConfig, AuthError, AuthEvent, AuthManager, AuthProcess, AuthRole, AuthSignal, AuthState,
    SecretProvider, SendFn, StaticSecretProvider, Timer, TimerFired, TimerHandle,
};
pub use domain::peer::{ConnectionId, InstanceId, Peer};
pub use domain::secret::{MatchPolicy, Secret, SecretError, DEFAULT_NAME_COUNT};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::framing::FrameDecoder;
pub use protocol::messages::{AuthMessage, Envelope};
