//! Multiplexer command channel and rendezvous handle
//!
//! Other execution contexts never touch the readiness set directly: they
//! send a command and block until the loop acknowledges that the change
//! has taken effect. This is the channel rendering of the classic
//! self-pipe-plus-condvar rendezvous: the bounded command channel is the
//! pipe, the oneshot reply is the predicate-guarded wakeup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::MuxError;
use crate::ConnId;

/// Readiness-set change requests consumed by the multiplexer loop
#[derive(Debug)]
pub enum MuxCommand {
    /// Add a descriptor to the readiness set
    Add {
        id: ConnId,
        reply: oneshot::Sender<()>,
    },
    /// Remove a descriptor from the readiness set
    Del {
        id: ConnId,
        reply: oneshot::Sender<()>,
    },
    /// Tear down every connection and stop the loop
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle for requesting readiness-set changes from outside the loop
#[derive(Debug, Clone)]
pub struct MuxHandle {
    tx: mpsc::Sender<MuxCommand>,
    active: Arc<AtomicUsize>,
}

impl MuxHandle {
    pub(crate) fn new(tx: mpsc::Sender<MuxCommand>, active: Arc<AtomicUsize>) -> Self {
        Self { tx, active }
    }

    /// Request the loop add a descriptor, blocking until applied
    ///
    /// On return the descriptor is part of the readiness set; the caller
    /// may safely use the connection.
    ///
    /// # Errors
    ///
    /// Returns `MuxError::Stopped` if the loop has terminated.
    pub async fn add(&self, id: ConnId) -> Result<(), MuxError> {
        self.rendezvous(|reply| MuxCommand::Add { id, reply }).await
    }

    /// Request the loop drop a descriptor, blocking until applied
    ///
    /// On return the descriptor is no longer in the readiness set and the
    /// loop will not touch it again; the caller may close the socket.
    pub async fn del(&self, id: ConnId) -> Result<(), MuxError> {
        self.rendezvous(|reply| MuxCommand::Del { id, reply }).await
    }

    /// Stop the loop, blocking until every connection is torn down
    pub async fn shutdown(&self) -> Result<(), MuxError> {
        self.rendezvous(|reply| MuxCommand::Shutdown { reply })
            .await
    }

    /// Number of descriptors currently in the readiness set
    ///
    /// Published by the loop after every rebuild; lags a change request
    /// only within the rendezvous window.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn rendezvous<F>(&self, make: F) -> Result<(), MuxError>
    where
        F: FnOnce(oneshot::Sender<()>) -> MuxCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| MuxError::Stopped)?;
        reply_rx.await.map_err(|_| MuxError::AckDropped)
    }
}
