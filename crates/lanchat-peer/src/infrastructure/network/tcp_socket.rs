//! Tokio TCP implementation of [`PeerSocket`].
//!
//! Each stream is split into halves and driven by two tasks:
//!
//! ```text
//!            ┌──────────── reader task ───────────┐
//! TcpStream ─┤  read() → SocketEvent::Data/Closed/Error ──► node event loop
//!            └──────────── writer task ◄── WriterCommand ◄── SendFn / destroy()
//! ```
//!
//! The node loop never touches the stream directly; it only sees
//! [`SocketEvent`]s tagged with the connection id, and writes through the
//! [`SendFn`] returned by [`PeerSocket::sender`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use lanchat_core::{ConnectionId, SendFn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::connection_handler::PeerSocket;

const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Something that happened on a socket, reported to the node event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Data {
        connection_id: ConnectionId,
        bytes: Vec<u8>,
    },
    /// The remote side closed its write half (EOF).
    Closed { connection_id: ConnectionId },
    Error {
        connection_id: ConnectionId,
        error: String,
    },
}

#[derive(Debug)]
enum WriterCommand {
    Data(Vec<u8>),
    Close,
}

/// A connected TCP stream with its reader and writer tasks.
pub struct TcpPeerSocket {
    connection_id: ConnectionId,
    peer_addr: SocketAddr,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    reader: JoinHandle<()>,
}

impl TcpPeerSocket {
    /// Takes ownership of `stream` and starts its reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the peer address cannot be read.
    pub fn spawn(stream: TcpStream, events: mpsc::Sender<SocketEvent>) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY for {peer_addr}: {e}");
        }

        let connection_id = ConnectionId::new();
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write_half, writer_rx, connection_id.clone()));
        let reader = tokio::spawn(read_loop(read_half, events, connection_id.clone()));

        debug!(connection = %connection_id, %peer_addr, "socket tasks started");
        Ok(Self {
            connection_id,
            peer_addr,
            writer_tx,
            reader,
        })
    }

    /// Address of the remote end, captured when the socket was spawned.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl PeerSocket for TcpPeerSocket {
    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn sender(&self) -> SendFn {
        let tx = self.writer_tx.clone();
        Arc::new(move |_id: &ConnectionId, bytes: &[u8]| {
            tx.send(WriterCommand::Data(bytes.to_vec())).is_ok()
        })
    }

    /// Flushes queued writes, shuts the stream down, and stops reading.
    /// No [`SocketEvent`] is reported for this connection afterwards.
    fn destroy(&mut self) {
        // A closed channel means the writer already exited.
        let _ = self.writer_tx.send(WriterCommand::Close);
        self.reader.abort();
    }
}

impl Drop for TcpPeerSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    connection_id: ConnectionId,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Data(bytes) => {
                if let Err(e) = half.write_all(&bytes).await {
                    warn!(connection = %connection_id, "write failed: {e}");
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }
    if let Err(e) = half.shutdown().await {
        debug!(connection = %connection_id, "shutdown failed: {e}");
    }
}

async fn read_loop(
    mut half: OwnedReadHalf,
    events: mpsc::Sender<SocketEvent>,
    connection_id: ConnectionId,
) {
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        let event = match half.read(&mut buf).await {
            Ok(0) => SocketEvent::Closed {
                connection_id: connection_id.clone(),
            },
            Ok(n) => SocketEvent::Data {
                connection_id: connection_id.clone(),
                bytes: buf[..n].to_vec(),
            },
            Err(e) => SocketEvent::Error {
                connection_id: connection_id.clone(),
                error: e.to_string(),
            },
        };
        let last = !matches!(event, SocketEvent::Data { .. });
        if events.send(event).await.is_err() || last {
            break;
        }
    }
    debug!(connection = %connection_id, "reader stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
