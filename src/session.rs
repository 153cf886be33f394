//! Session-layer contract
//!
//! The client-facing transport (websocket serving, framing, TLS) lives
//! outside this crate. The core talks back to it through [`SessionPeer`]:
//! a non-owning handle attached to each bridged connection, used to hand
//! over bytes read from the backend and to report that the backend side
//! dropped.
//!
//! Callbacks are invoked from the multiplexer task and must not block.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Callback interface from the core to the session layer
pub trait SessionPeer: Send + Sync {
    /// Bytes read from the backend socket are available for this
    /// connection's client-facing session.
    fn deliver(&self, bytes: Bytes);

    /// The backend connection dropped (EOF or read/write error); the
    /// session layer should tear down the corresponding client session.
    fn backend_closed(&self);
}

/// Events emitted by [`EventPeer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes forwarded from the backend
    Data(Bytes),
    /// Backend side dropped
    BackendClosed,
}

/// Channel-backed [`SessionPeer`] implementation
///
/// Forwards every callback into an unbounded mpsc channel. Session layers
/// built on tokio can consume the receiver directly; the integration tests
/// use it as their session stand-in.
#[derive(Debug, Clone)]
pub struct EventPeer {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventPeer {
    /// Create a peer and the receiving end of its event stream
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionPeer for EventPeer {
    fn deliver(&self, bytes: Bytes) {
        // A dropped receiver means the session is already gone; the
        // backend-drop path will clean the connection up.
        let _ = self.tx.send(SessionEvent::Data(bytes));
    }

    fn backend_closed(&self) {
        let _ = self.tx.send(SessionEvent::BackendClosed);
    }
}
