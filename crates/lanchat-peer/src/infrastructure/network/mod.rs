//! Network infrastructure for the chat peer.
//!
//! # Sub-modules
//!
//! - **`tcp_socket`** – [`tcp_socket::TcpPeerSocket`], the Tokio implementation
//!   of the application layer's `PeerSocket`.  One reader task and one writer
//!   task per stream.
//!
//! - **`listener`** – Binds the chat port and forwards accepted streams.
//!
//! - **`connector`** – Opens outgoing streams with a timeout.
//!
//! - **`discovery`** – Broadcasts our own `ANNOUNCE` datagram periodically and
//!   reports announcements from other nodes.  Runs on a dedicated thread.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub mod connector;
pub mod discovery;
pub mod listener;
pub mod tcp_socket;

/// Error type for TCP operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The remote refused or was unreachable.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The connect did not complete in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimedOut { addr: SocketAddr, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
