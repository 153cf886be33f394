//! Bridged connection record and relay read/write paths
//!
//! One [`Connection`] exists per live bridge between a client-facing
//! session and a backend socket. The record is owned by the connection
//! directory; the multiplexer and the session layer hold `Arc` clones
//! whose lifetime never exceeds the directory entry plus the in-flight
//! rendezvous window.

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UnixStream;

use crate::queue::{Message, MessageQueue};
use crate::registry::ChannelMapping;
use crate::session::SessionPeer;
use crate::ConnId;

/// Lifecycle state of a bridged connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and part of (or en route to) the readiness set
    Open,
    /// Session-close in progress; excluded from readiness-set rebuilds
    Closing,
    /// Backend side dropped; awaiting removal by the multiplexer
    Dropped,
}

/// A live bridged connection
///
/// Invariants: the id is unique among live connections, and the record is
/// present in the directory iff its descriptor is part of the multiplexer's
/// readiness set (modulo the in-flight add/remove rendezvous window).
pub struct Connection {
    id: ConnId,
    mapping: Arc<ChannelMapping>,
    peer: Arc<dyn SessionPeer>,
    stream: UnixStream,
    outbound: Mutex<MessageQueue>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Wrap a freshly connected backend stream
    pub(crate) fn new(
        stream: UnixStream,
        mapping: Arc<ChannelMapping>,
        peer: Arc<dyn SessionPeer>,
    ) -> Arc<Self> {
        let id = stream.as_raw_fd();
        Arc::new(Self {
            id,
            mapping,
            peer,
            stream,
            outbound: Mutex::new(MessageQueue::new()),
            state: Mutex::new(ConnectionState::Open),
        })
    }

    /// Stable connection id (the backend descriptor)
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Channel this connection bridges
    #[must_use]
    pub fn channel(&self) -> &str {
        self.mapping.name()
    }

    /// The mapping this connection was opened from
    #[must_use]
    pub fn mapping(&self) -> &Arc<ChannelMapping> {
        &self.mapping
    }

    /// The session-layer peer handle
    pub(crate) fn peer(&self) -> &Arc<dyn SessionPeer> {
        &self.peer
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Number of messages waiting on the outbound-to-backend queue
    #[must_use]
    pub fn outbound_depth(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Enqueue client-side bytes for the backend socket
    pub(crate) fn enqueue_outbound(&self, bytes: Bytes) {
        self.outbound.lock().enqueue(Message::new(bytes));
    }

    /// Drain the outbound queue into the backend socket.
    ///
    /// The backend socket is a dedicated point-to-point consumer, so the
    /// write path runs in the caller's context and awaits writability as
    /// needed. Returns the number of bytes written.
    pub(crate) async fn drain_outbound(&self) -> io::Result<usize> {
        let mut written = 0usize;
        loop {
            // Lock only for the dequeue, never across an await.
            let msg = self.outbound.lock().dequeue();
            let Some(msg) = msg else { break };

            let mut remaining = msg.payload();
            while !remaining.is_empty() {
                self.stream.writable().await?;
                match self.stream.try_write(remaining) {
                    Ok(n) => {
                        written += n;
                        remaining = &remaining[n..];
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(written)
    }

    /// Wait until the backend socket is readable
    pub(crate) async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    /// Non-blocking read into the multiplexer's scratch buffer
    ///
    /// `Ok(0)` means the backend side dropped.
    pub(crate) fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("channel", &self.mapping.name())
            .field("state", &self.state())
            .field("outbound_depth", &self.outbound_depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SocketRegistry;
    use crate::session::EventPeer;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;
    use tempfile::tempdir;

    async fn connected_pair() -> (Arc<Connection>, tokio::net::UnixStream) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backend.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register("test", &path).unwrap();
        let mapping = registry.resolve("test").unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let (peer, _rx) = EventPeer::new();
        (Connection::new(stream, mapping, Arc::new(peer)), accepted)
    }

    #[tokio::test]
    async fn test_id_matches_descriptor() {
        let (conn, _accepted) = connected_pair().await;
        assert!(conn.id() >= 0);
        assert_eq!(conn.channel(), "test");
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_drain_outbound_writes_in_order() {
        let (conn, mut accepted) = connected_pair().await;

        conn.enqueue_outbound(Bytes::from_static(b"hello "));
        conn.enqueue_outbound(Bytes::from_static(b"world"));
        assert_eq!(conn.outbound_depth(), 2);

        let written = conn.drain_outbound().await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(conn.outbound_depth(), 0);

        let mut buf = [0u8; 11];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn test_drain_empty_queue_is_noop() {
        let (conn, _accepted) = connected_pair().await;
        assert_eq!(conn.drain_outbound().await.unwrap(), 0);
    }
}
