//! Tokio-backed implementation of the handshake [`Timer`] seam.
//!
//! Each armed timer is a task that sleeps and then sends a [`TimerFired`]
//! to the node event loop.  Clearing a timer aborts its task, so a cleared
//! timer never reports.  The node loop still gets stale firings in one case
//! (the timer fired just before being cleared); the handshake recognises
//! those by handle and ignores them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lanchat_core::{ConnectionId, Timer, TimerFired, TimerHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TokioTimer {
    next: AtomicU64,
    tasks: Mutex<HashMap<TimerHandle, JoinHandle<()>>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimer {
    /// Creates the timer and the receiver its firings arrive on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let timer = Arc::new(Self {
            next: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            fired_tx,
        });
        (timer, fired_rx)
    }

    /// Number of timers armed and not yet cleared.
    pub fn armed(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Timer for TokioTimer {
    /// Must be called from within a Tokio runtime.
    fn set(&self, connection_id: &ConnectionId, delay: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let fired = TimerFired {
            connection_id: connection_id.clone(),
            handle,
        };
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, task);
        handle
    }

    fn clear(&self, handle: TimerHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if let Some(task) = task {
            task.abort();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
