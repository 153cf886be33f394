//! Bridge facade: connection lifecycle operations
//!
//! Ties the socket registry, connection directory and multiplexer loop
//! together behind the three calls the session layer makes: `open`,
//! `close` and `relay_in`. Each call is synchronous with respect to the
//! multiplexer's readiness set: when `open` returns the descriptor is
//! being watched, and when `close` returns it no longer is.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionState};
use crate::directory::ConnectionDirectory;
use crate::error::{BridgeError, DirectoryError, OpenError};
use crate::mux::{self, MuxHandle};
use crate::registry::SocketRegistry;
use crate::session::SessionPeer;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::ConnId;

/// The relay engine
///
/// Owns the registry, the directory and the multiplexer task. Cloneable
/// handles are not provided; share the engine behind an `Arc`.
pub struct Bridge {
    registry: SocketRegistry,
    directory: Arc<ConnectionDirectory>,
    mux: MuxHandle,
    stats: Arc<RelayStats>,
    mux_task: JoinHandle<()>,
}

impl Bridge {
    /// Start the engine with default tuning
    #[must_use]
    pub fn start(registry: SocketRegistry) -> Self {
        Self::start_with_config(registry, &EngineConfig::default())
    }

    /// Start the engine, spawning the multiplexer loop task
    #[must_use]
    pub fn start_with_config(registry: SocketRegistry, engine: &EngineConfig) -> Self {
        let directory = Arc::new(ConnectionDirectory::new());
        let stats = Arc::new(RelayStats::new());

        let (mux, mux_task) = mux::spawn(
            Arc::clone(&directory),
            Arc::clone(&stats),
            registry.max_buffer_hint(),
            engine.command_queue_depth,
        );

        info!(
            channels = registry.len(),
            "relay engine started"
        );

        Self {
            registry,
            directory,
            mux,
            stats,
            mux_task,
        }
    }

    /// Open a bridged connection for a channel
    ///
    /// Resolves the channel, verifies the backend address is a socket of
    /// the expected transport kind, connects, inserts the record into the
    /// directory, then blocks until the multiplexer has the descriptor in
    /// its readiness set. On any failure after connect, the socket is
    /// closed and the directory insertion rolled back before returning.
    ///
    /// # Errors
    ///
    /// `OpenError` distinguishes unknown channel, bad address, connect
    /// failure, id collision and engine shutdown. No retry is performed;
    /// retry policy belongs to the session layer.
    pub async fn open(
        &self,
        channel: &str,
        peer: Arc<dyn SessionPeer>,
    ) -> Result<ConnId, OpenError> {
        let result = self.open_inner(channel, peer).await;
        if result.is_err() {
            self.stats.record_open_failure();
        }
        result
    }

    async fn open_inner(
        &self,
        channel: &str,
        peer: Arc<dyn SessionPeer>,
    ) -> Result<ConnId, OpenError> {
        let mapping = self.registry.resolve(channel)?;

        // The backend daemon may have gone away since registration.
        mapping.verify_address()?;

        let stream = UnixStream::connect(mapping.address())
            .await
            .map_err(|e| OpenError::connect_failed(mapping.address(), e.to_string()))?;

        let conn = Connection::new(stream, mapping, peer);
        let id = conn.id();

        self.directory
            .insert(conn)
            .map_err(|DirectoryError::IdCollision { id, .. }| OpenError::IdCollision { id })?;

        // Rendezvous: block until the loop watches the descriptor.
        if let Err(e) = self.mux.add(id).await {
            // Roll back so the failed open leaves no trace.
            self.directory.remove(id);
            debug!(id, channel, error = %e, "open rolled back, engine stopped");
            return Err(OpenError::EngineStopped);
        }

        self.stats.record_opened();
        debug!(id, channel, "connection opened");
        Ok(id)
    }

    /// Close a bridged connection
    ///
    /// The descriptor leaves the readiness set before the entry is removed
    /// and the socket dropped, so the loop can never observe a closed or
    /// reused fd.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` if the id is not live (the backend may
    /// have dropped first), or `Mux` errors if the engine has stopped.
    pub async fn close(&self, id: ConnId) -> Result<(), BridgeError> {
        let conn = self
            .directory
            .find(id)
            .ok_or(BridgeError::ConnectionNotFound { id })?;

        // Marking Closing takes the entry out of readiness-set rebuilds;
        // the Del rendezvous makes that visible to the loop.
        conn.set_state(ConnectionState::Closing);
        self.mux.del(id).await?;

        self.directory.remove(id);
        self.stats.record_closed();
        debug!(id, channel = conn.channel(), "connection closed");
        // Last Arc drops here (loop rebuilt without it); the fd closes now.
        Ok(())
    }

    /// Relay client-side bytes to a connection's backend socket
    ///
    /// Bytes pass through the connection's outbound queue and are drained
    /// to the backend in the caller's context, awaiting writability as
    /// needed. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// A write error tears the connection down (the session layer is also
    /// notified through its peer handle) and surfaces as `Transfer`.
    pub async fn relay_in(&self, id: ConnId, bytes: Bytes) -> Result<usize, BridgeError> {
        let conn = self
            .directory
            .find(id)
            .ok_or(BridgeError::ConnectionNotFound { id })?;

        conn.enqueue_outbound(bytes);
        match conn.drain_outbound().await {
            Ok(n) => {
                self.stats.record_bytes_to_backend(n as u64);
                Ok(n)
            }
            Err(source) => {
                // Backend write errors are local to this connection.
                conn.set_state(ConnectionState::Closing);
                let _ = self.mux.del(id).await;
                self.directory.remove(id);
                conn.peer().backend_closed();
                self.stats.record_backend_drop();
                Err(BridgeError::Transfer { id, source })
            }
        }
    }

    /// Stop the engine: tear down all connections and join the loop task
    pub async fn shutdown(self) -> StatsSnapshot {
        // The loop may already be gone if every handle was dropped.
        let _ = self.mux.shutdown().await;
        let _ = self.mux_task.await;

        let snapshot = self.stats.snapshot();
        info!(
            opened = snapshot.opened,
            closed = snapshot.closed,
            backend_drops = snapshot.backend_drops,
            "relay engine stopped"
        );
        snapshot
    }

    /// The engine's socket registry
    #[must_use]
    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    /// Number of live bridged connections
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.directory.len()
    }

    /// Number of descriptors in the multiplexer's readiness set
    #[must_use]
    pub fn watched_descriptors(&self) -> usize {
        self.mux.active_count()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("channels", &self.registry.len())
            .field("live_connections", &self.live_connections())
            .field("watched_descriptors", &self.watched_descriptors())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EventPeer;
    use tokio::net::UnixListener;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_unknown_channel_is_pure() {
        let bridge = Bridge::start(SocketRegistry::new());
        let (peer, _rx) = EventPeer::new();

        let err = bridge.open("missing", Arc::new(peer)).await.unwrap_err();
        assert!(matches!(err, OpenError::UnknownChannel { .. }));
        assert_eq!(bridge.live_connections(), 0);
        assert_eq!(bridge.watched_descriptors(), 0);
        assert_eq!(bridge.stats().open_failures, 1);
    }

    #[tokio::test]
    async fn test_open_dead_backend_is_pure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register("alpha", &path).unwrap();

        // Backend goes away after registration.
        drop(listener);
        std::fs::remove_file(&path).unwrap();

        let bridge = Bridge::start(registry);
        let (peer, _rx) = EventPeer::new();

        let err = bridge.open("alpha", Arc::new(peer)).await.unwrap_err();
        assert!(matches!(err, OpenError::BadAddress { .. }));
        assert_eq!(bridge.live_connections(), 0);
        assert_eq!(bridge.watched_descriptors(), 0);
    }

    #[tokio::test]
    async fn test_close_unknown_connection() {
        let bridge = Bridge::start(SocketRegistry::new());
        let err = bridge.close(12345).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_directory_size_tracks_opens_minus_closes() {
        let dir = tempdir().unwrap();
        let mut registry = SocketRegistry::new();
        let mut listeners = Vec::new();
        for name in ["a", "b", "c"] {
            let path = dir.path().join(format!("{name}.sock"));
            listeners.push(UnixListener::bind(&path).unwrap());
            registry.register(name, &path).unwrap();
        }

        let bridge = Bridge::start(registry);

        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let (peer, _rx) = EventPeer::new();
            ids.push(bridge.open(name, Arc::new(peer)).await.unwrap());
        }
        assert_eq!(bridge.live_connections(), 3);
        assert_eq!(bridge.watched_descriptors(), 3);

        bridge.close(ids[0]).await.unwrap();
        assert_eq!(bridge.live_connections(), 2);
        assert_eq!(bridge.watched_descriptors(), 2);

        bridge.close(ids[1]).await.unwrap();
        bridge.close(ids[2]).await.unwrap();
        assert_eq!(bridge.live_connections(), 0);
        assert_eq!(bridge.watched_descriptors(), 0);

        let snapshot = bridge.shutdown().await;
        assert_eq!(snapshot.opened, 3);
        assert_eq!(snapshot.closed, 3);
    }
}
