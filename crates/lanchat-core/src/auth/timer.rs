//! One-shot timer seam used for the handshake timeout.
//!
//! The state machine never sleeps.  It asks a [`Timer`] to deliver a
//! [`TimerFired`] notification later and hands that notification back to
//! [`crate::AuthManager::handle_timeout`] when it arrives.  Production code
//! backs this with `tokio::time::sleep`; tests use a mock and fire timers by
//! hand.

use std::time::Duration;

use crate::domain::peer::ConnectionId;

/// Opaque handle identifying one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Notification delivered when an armed timer elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub connection_id: ConnectionId,
    pub handle: TimerHandle,
}

/// Schedules and cancels one-shot timeout notifications.
///
/// Implementations must tolerate `clear` on a handle that already fired or
/// was never armed; it is a no-op, not an error.
#[cfg_attr(test, mockall::automock)]
pub trait Timer: Send + Sync {
    /// Arms a timer that reports [`TimerFired`] for `connection_id` after `delay`.
    fn set(&self, connection_id: &ConnectionId, delay: Duration) -> TimerHandle;

    /// Cancels the timer identified by `handle`.
    fn clear(&self, handle: TimerHandle);
}
