//! TCP accept loop for incoming chat connections.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info};

use super::NetworkError;

/// How long one `accept()` may block before the `running` flag is rechecked.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Binds the chat listener.
///
/// # Errors
///
/// Returns [`NetworkError::BindFailed`] if the address is in use or not
/// available.
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::BindFailed { addr, source })?;
    info!("listening for chat connections on {addr}");
    Ok(listener)
}

/// Accepts connections until `running` is cleared or the receiver is dropped.
pub async fn run_accept_loop(
    listener: TcpListener,
    accepted: mpsc::Sender<(TcpStream, SocketAddr)>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                info!("incoming connection from {addr}");
                if accepted.send((stream, addr)).await.is_err() {
                    break;
                }
            }
            // Transient (e.g. too many open files); keep accepting.
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
    info!("accept loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
