//! The pairing handshake.
//!
//! # Handshake flow (for beginners)
//!
//! The side that *accepted* the TCP connection is the **responder**; the side
//! that *dialled* is the **initiator**.  Only the responder speaks first:
//!
//! ```text
//! Responder                               Initiator
//! ─────────                               ─────────
//! start(): arm timeout                    start(): arm timeout
//!          send AUTH_REQ   ────────────►
//!                                         ask human for names
//!                          ◄────────────  send AUTH_RESP{names}
//! check arity, compare
//!          send AUTH_SUCCESS ──────────►  Authenticated
//!   (or    send AUTH_FAIL    ──────────►  Failed)
//! ```
//!
//! Either side fails with `"Authentication timed out"` if the exchange does
//! not finish within [`AuthConfig::timeout`].
//!
//! # Sub-modules
//!
//! - **`process`** – [`AuthProcess`], one state machine per connection.
//! - **`manager`** – [`AuthManager`], the registry that routes raw lines to
//!   the right process and publishes [`AuthEvent`]s.
//! - **`timer`** – the [`Timer`] seam for the timeout.
//! - **`secret_provider`** – the [`SecretProvider`] seam for the initiator's
//!   names.

pub mod manager;
pub mod process;
pub mod secret_provider;
pub mod timer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::peer::ConnectionId;
use crate::domain::secret::{MatchPolicy, DEFAULT_NAME_COUNT};
use crate::protocol::codec::ProtocolError;

pub use manager::{AuthEvent, AuthManager, ProcessFactory};
pub use process::AuthProcess;
pub use secret_provider::{SecretProvider, StaticSecretProvider};
pub use timer::{Timer, TimerFired, TimerHandle};

/// Default time a handshake may take before it is abandoned.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

// ── Failure reasons ───────────────────────────────────────────────────────────

pub const REASON_TIMED_OUT: &str = "Authentication timed out";
pub const REASON_USER_CANCELLED: &str = "User cancelled input";
pub const REASON_PEER_REJECTED: &str = "Authentication failed by peer";
pub const REASON_INVALID_FORMAT: &str = "Invalid message format";
pub const REASON_MISMATCH: &str = "Names do not match";
pub const REASON_CONNECTION_CLOSED: &str = "Connection closed";
pub const REASON_SUPERSEDED: &str = "Superseded by a new authentication attempt";
pub const REASON_NO_LOCAL_SECRET: &str = "No local secret configured";

/// Builds the reason sent when a response has the wrong shape.
pub fn invalid_names_reason(expected: usize) -> String {
    format!("Invalid names: expected exactly {expected} non-empty names")
}

/// Sends raw bytes on the connection identified by the first argument.
///
/// Returns `false` if the bytes could not be queued; the handshake does not
/// retry and relies on its timeout instead.
pub type SendFn = Arc<dyn Fn(&ConnectionId, &[u8]) -> bool + Send + Sync>;

/// Errors for conditions the handshake does not expect.
///
/// Ordinary failures (wrong names, timeout, cancellation) are never returned
/// as `Err`; they are reported as [`AuthSignal::Failed`] / [`AuthEvent::Failed`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// An outgoing message could not be encoded.
    #[error("failed to encode handshake message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Handshake settings shared by every process a manager creates.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Number of names in a valid secret.
    pub name_count: usize,
    /// Time allowed from `start()` to a terminal state.
    pub timeout: Duration,
    /// How received names are compared with the local secret.
    pub match_policy: MatchPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            name_count: DEFAULT_NAME_COUNT,
            timeout: DEFAULT_AUTH_TIMEOUT,
            match_policy: MatchPolicy::Positional,
        }
    }
}

/// Which side of the TCP connection this process is on.  Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRole {
    /// Opened the connection; waits for the challenge.
    Initiator,
    /// Accepted the connection; issues the challenge.
    Responder,
}

impl AuthRole {
    pub fn is_initiator(self) -> bool {
        matches!(self, AuthRole::Initiator)
    }
}

/// Current state of an [`AuthProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Created but not started.
    Idle,
    /// Initiator: challenged, waiting for the local human to enter names.
    WaitingForUserSecret,
    /// Initiator: waiting for `AUTH_REQ`.
    WaitingForChallenge,
    /// Responder: `AUTH_REQ` sent, waiting for `AUTH_RESP`.
    WaitingForResponse,
    /// Initiator: `AUTH_RESP` sent, waiting for the verdict.
    WaitingForValidation,
    /// Terminal: both sides proved knowledge of the secret.
    Authenticated,
    /// Terminal: the handshake failed, timed out, or was aborted.
    Failed,
}

impl AuthState {
    /// Returns `true` for `Authenticated` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a single call into an [`AuthProcess`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    /// The initiator was challenged and now needs the local secret.
    SecretRequired,
    /// The process reached `Authenticated`.
    Authenticated,
    /// The process reached `Failed`.
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_defaults() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.name_count, 3);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.match_policy, MatchPolicy::Positional);
    }

    #[test]
    fn test_terminal_states() {
        assert!(AuthState::Authenticated.is_terminal());
        assert!(AuthState::Failed.is_terminal());
        assert!(!AuthState::Idle.is_terminal());
        assert!(!AuthState::WaitingForUserSecret.is_terminal());
    }

    #[test]
    fn test_invalid_names_reason_mentions_required_count() {
        assert!(invalid_names_reason(3).contains('3'));
        assert!(invalid_names_reason(3).starts_with("Invalid names"));
    }
}
