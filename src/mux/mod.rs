//! I/O multiplexer loop
//!
//! A single dedicated task owns the readiness set: the collection of
//! backend sockets currently bridged. Each iteration blocks, with no
//! timeout, until either a watched socket becomes readable or a command
//! arrives on the rendezvous channel (the channel takes the permanent
//! slot-0 role of the classic self-pipe and is polled first).
//!
//! The set's contents are never patched incrementally. On every add or
//! remove command the loop rebuilds the set from the authoritative
//! connection directory; rebuild-from-directory is the invariant that
//! keeps the two structures from diverging. Capacity grows in fixed
//! chunks and never shrinks.
//!
//! The loop is also the only code allowed to delete directory entries for
//! backend-side drops. Session-initiated closes delete through the
//! rendezvous path instead; those are the two deletion sites.

mod command;

pub use command::{MuxCommand, MuxHandle};

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::select_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionState};
use crate::directory::ConnectionDirectory;
use crate::stats::RelayStats;

/// Readiness-set capacity growth increment
const WATCH_CHUNK: usize = 16;

/// Loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    /// Blocked in, or iterating after, the readiness wait
    Running,
    /// Processing one or more ready descriptors
    Draining,
    /// Terminal: explicit shutdown or command channel closed
    Stopped,
}

/// What woke the loop up
enum Wakeup {
    Command(MuxCommand),
    ChannelClosed,
    Ready {
        conn: Arc<Connection>,
        result: io::Result<()>,
    },
}

/// The multiplexer loop state machine
struct Multiplexer {
    directory: Arc<ConnectionDirectory>,
    stats: Arc<RelayStats>,
    commands: mpsc::Receiver<MuxCommand>,
    /// The readiness set. Touched only from this task.
    watched: Vec<Arc<Connection>>,
    /// Published active count, for observers outside the loop
    active: Arc<AtomicUsize>,
    /// Shared scratch buffer for backend reads
    scratch: Vec<u8>,
    state: LoopState,
}

/// Spawn the multiplexer loop task
///
/// `scratch_size` should be the largest buffer hint across the registry;
/// `command_depth` bounds the rendezvous channel.
pub(crate) fn spawn(
    directory: Arc<ConnectionDirectory>,
    stats: Arc<RelayStats>,
    scratch_size: usize,
    command_depth: usize,
) -> (MuxHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(command_depth.max(1));
    let active = Arc::new(AtomicUsize::new(0));

    let mux = Multiplexer {
        directory,
        stats,
        commands: rx,
        watched: Vec::with_capacity(WATCH_CHUNK),
        active: Arc::clone(&active),
        scratch: vec![0u8; scratch_size.max(64)],
        state: LoopState::Running,
    };

    let handle = MuxHandle::new(tx, active);
    let task = tokio::spawn(mux.run());
    (handle, task)
}

impl Multiplexer {
    async fn run(mut self) {
        debug!("multiplexer loop started");

        while self.state != LoopState::Stopped {
            self.state = LoopState::Running;

            match self.wait().await {
                Wakeup::ChannelClosed => {
                    // Every handle is gone; nothing can reach the engine.
                    debug!("command channel closed, stopping loop");
                    self.teardown_all();
                    self.state = LoopState::Stopped;
                }
                Wakeup::Command(cmd) => self.apply(cmd),
                Wakeup::Ready { conn, result } => {
                    self.state = LoopState::Draining;
                    self.service_ready(&conn, result);
                }
            }
        }

        self.active.store(0, Ordering::SeqCst);
        debug!("multiplexer loop stopped");
    }

    /// Block until a command arrives or a watched descriptor is readable.
    ///
    /// No timeout: only real events or the rendezvous channel wake the
    /// loop. The command channel is polled first (slot 0).
    async fn wait(&mut self) -> Wakeup {
        if self.watched.is_empty() {
            return match self.commands.recv().await {
                Some(cmd) => Wakeup::Command(cmd),
                None => Wakeup::ChannelClosed,
            };
        }

        let ready: Vec<_> = self
            .watched
            .iter()
            .map(|conn| {
                let conn = Arc::clone(conn);
                Box::pin(async move {
                    let result = conn.readable().await;
                    (conn, result)
                })
            })
            .collect();

        tokio::select! {
            biased;
            cmd = self.commands.recv() => match cmd {
                Some(cmd) => Wakeup::Command(cmd),
                None => Wakeup::ChannelClosed,
            },
            ((conn, result), _, _) = select_all(ready) => Wakeup::Ready { conn, result },
        }
    }

    /// Apply one readiness-set change command and acknowledge it
    fn apply(&mut self, cmd: MuxCommand) {
        match cmd {
            MuxCommand::Add { id, reply } => {
                // Amortized chunked growth; capacity only ever increases.
                if self.watched.len() == self.watched.capacity() {
                    self.watched.reserve(WATCH_CHUNK);
                }
                self.rebuild();
                trace!(id, active = self.watched.len(), "descriptor added");
                let _ = reply.send(());
            }
            MuxCommand::Del { id, reply } => {
                self.rebuild();
                trace!(id, active = self.watched.len(), "descriptor removed");
                let _ = reply.send(());
            }
            MuxCommand::Shutdown { reply } => {
                info!("multiplexer shutdown requested");
                self.teardown_all();
                self.state = LoopState::Stopped;
                let _ = reply.send(());
            }
        }
    }

    /// Relay bytes from a readable backend socket to its peer session
    fn service_ready(&mut self, conn: &Arc<Connection>, result: io::Result<()>) {
        // A close may have started between the rebuild and this wakeup.
        if conn.state() != ConnectionState::Open {
            return;
        }

        if let Err(e) = result {
            self.drop_connection(conn, &e.to_string());
            return;
        }

        match conn.try_read(&mut self.scratch) {
            Ok(0) => self.drop_connection(conn, "eof"),
            Ok(n) => {
                trace!(id = conn.id(), channel = conn.channel(), bytes = n, "relay out");
                self.stats.record_bytes_to_client(n as u64);
                conn.peer().deliver(Bytes::copy_from_slice(&self.scratch[..n]));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Spurious readiness; wait again.
            }
            Err(e) => self.drop_connection(conn, &e.to_string()),
        }
    }

    /// Tear down one connection whose backend side dropped.
    ///
    /// This is the loop's own deletion site: the entry leaves the
    /// directory before the next wait, and the session layer is notified
    /// so it can tear down the client-facing session.
    fn drop_connection(&mut self, conn: &Arc<Connection>, reason: &str) {
        warn!(
            id = conn.id(),
            channel = conn.channel(),
            reason,
            "backend connection dropped"
        );

        conn.set_state(ConnectionState::Dropped);
        conn.peer().backend_closed();
        self.directory.remove(conn.id());
        self.stats.record_backend_drop();
        self.rebuild();
    }

    /// Rebuild the readiness set from the authoritative directory
    fn rebuild(&mut self) {
        self.watched.clear();
        self.watched.extend(self.directory.watch_set());
        self.active.store(self.watched.len(), Ordering::SeqCst);
    }

    /// Tear down every live connection (loop shutdown)
    fn teardown_all(&mut self) {
        let live = self.directory.drain_all();
        if !live.is_empty() {
            info!(count = live.len(), "tearing down live connections");
        }
        for conn in live {
            conn.set_state(ConnectionState::Dropped);
            conn.peer().backend_closed();
        }
        self.watched.clear();
        self.active.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SocketRegistry;
    use crate::session::{EventPeer, SessionEvent};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{UnixListener, UnixStream};
    use tempfile::tempdir;

    struct Fixture {
        directory: Arc<ConnectionDirectory>,
        handle: MuxHandle,
        task: JoinHandle<()>,
    }

    fn start_mux() -> Fixture {
        let directory = Arc::new(ConnectionDirectory::new());
        let stats = Arc::new(RelayStats::new());
        let (handle, task) = spawn(Arc::clone(&directory), stats, 1024, 8);
        Fixture {
            directory,
            handle,
            task,
        }
    }

    async fn bridged_connection(
        dir: &std::path::Path,
        name: &str,
    ) -> (
        Arc<Connection>,
        UnixStream,
        tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let path = dir.join(format!("{name}.sock"));
        let listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register(name, &path).unwrap();
        let mapping = registry.resolve(name).unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let (peer, rx) = EventPeer::new();
        (Connection::new(stream, mapping, Arc::new(peer)), accepted, rx)
    }

    async fn recv_event(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_add_and_del_update_active_count() {
        let tmp = tempdir().unwrap();
        let fx = start_mux();

        let (conn, _accepted, _rx) = bridged_connection(tmp.path(), "alpha").await;
        let id = conn.id();

        fx.directory.insert(conn).unwrap();
        fx.handle.add(id).await.unwrap();
        assert_eq!(fx.handle.active_count(), 1);

        let conn = fx.directory.find(id).unwrap();
        conn.set_state(ConnectionState::Closing);
        fx.handle.del(id).await.unwrap();
        assert_eq!(fx.handle.active_count(), 0);
    }

    #[tokio::test]
    async fn test_readable_backend_delivers_to_peer() {
        let tmp = tempdir().unwrap();
        let fx = start_mux();

        let (conn, mut accepted, mut rx) = bridged_connection(tmp.path(), "alpha").await;
        let id = conn.id();
        fx.directory.insert(conn).unwrap();
        fx.handle.add(id).await.unwrap();

        accepted.write_all(b"world").await.unwrap();
        accepted.flush().await.unwrap();

        match recv_event(&mut rx).await {
            SessionEvent::Data(bytes) => assert_eq!(&bytes[..], b"world"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_eof_drops_connection() {
        let tmp = tempdir().unwrap();
        let fx = start_mux();

        let (conn, accepted, mut rx) = bridged_connection(tmp.path(), "alpha").await;
        let id = conn.id();
        fx.directory.insert(conn).unwrap();
        fx.handle.add(id).await.unwrap();

        drop(accepted);

        assert_eq!(recv_event(&mut rx).await, SessionEvent::BackendClosed);

        // The loop deletes the entry itself before the next wait.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !fx.directory.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("directory drained");
        assert_eq!(fx.handle.active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_everything() {
        let tmp = tempdir().unwrap();
        let fx = start_mux();

        let (a, _keep_a, mut rx_a) = bridged_connection(tmp.path(), "alpha").await;
        let (b, _keep_b, mut rx_b) = bridged_connection(tmp.path(), "beta").await;
        let (ida, idb) = (a.id(), b.id());

        fx.directory.insert(a).unwrap();
        fx.directory.insert(b).unwrap();
        fx.handle.add(ida).await.unwrap();
        fx.handle.add(idb).await.unwrap();
        assert_eq!(fx.handle.active_count(), 2);

        fx.handle.shutdown().await.unwrap();
        fx.task.await.unwrap();
        assert_eq!(fx.handle.active_count(), 0);
        assert!(fx.directory.is_empty());
        assert_eq!(recv_event(&mut rx_a).await, SessionEvent::BackendClosed);
        assert_eq!(recv_event(&mut rx_b).await, SessionEvent::BackendClosed);

        // Further commands fail once the loop has stopped.
        let err = fx.handle.add(ida).await.unwrap_err();
        assert!(matches!(err, crate::error::MuxError::Stopped));
    }
}
