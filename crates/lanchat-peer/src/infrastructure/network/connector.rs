//! Outgoing TCP connections with a bounded connect time.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::NetworkError;

/// Opens a TCP connection to `addr`, giving up after `limit`.
///
/// # Errors
///
/// Returns [`NetworkError::ConnectFailed`] when the connection is refused or
/// unreachable, and [`NetworkError::ConnectTimedOut`] when `limit` elapses.
pub async fn connect_with_timeout(
    addr: SocketAddr,
    limit: Duration,
) -> Result<TcpStream, NetworkError> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(NetworkError::ConnectFailed { addr, source }),
        Err(_) => Err(NetworkError::ConnectTimedOut {
            addr,
            timeout: limit,
        }),
    }
}
