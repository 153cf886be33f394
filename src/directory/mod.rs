//! Connection directory
//!
//! The authoritative map of live bridged connections, keyed by backend
//! descriptor. Session-layer callbacks and the multiplexer task both go
//! through one mutex; it is held only for the map mutation itself, never
//! across a blocking call or an await point.
//!
//! There are exactly two deletion sites: the multiplexer removes entries
//! whose backend dropped, and the session-close rendezvous path removes
//! entries it marked `Closing`. No other code deletes from this map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::connection::{Connection, ConnectionState};
use crate::error::DirectoryError;
use crate::ConnId;

/// Directory of live connections keyed by connection id
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    inner: Mutex<HashMap<ConnId, Arc<Connection>>>,
}

impl ConnectionDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, detecting id collisions
    ///
    /// # Errors
    ///
    /// Returns `IdCollision` if the id is already live. A collision means a
    /// descriptor was reused before its prior entry was removed; it is
    /// surfaced loudly and the existing entry is left untouched.
    pub fn insert(&self, conn: Arc<Connection>) -> Result<(), DirectoryError> {
        let id = conn.id();
        let mut map = self.inner.lock();

        if let Some(existing) = map.get(&id) {
            error!(
                id,
                new_channel = conn.channel(),
                existing_channel = existing.channel(),
                "connection id collision: descriptor reused before removal"
            );
            return Err(DirectoryError::IdCollision {
                id,
                channel: conn.channel().to_owned(),
            });
        }

        map.insert(id, conn);
        Ok(())
    }

    /// Look up a connection by id
    #[must_use]
    pub fn find(&self, id: ConnId) -> Option<Arc<Connection>> {
        self.inner.lock().get(&id).cloned()
    }

    /// Remove a connection; returns true iff something was removed
    ///
    /// Dropping the returned entry releases its message queue and any
    /// queued messages.
    pub fn remove(&self, id: ConnId) -> bool {
        self.inner.lock().remove(&id).is_some()
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot of the connections that belong in the readiness set
    ///
    /// The multiplexer rebuilds its set from this on every add/remove
    /// command. Entries in `Closing` or `Dropped` state are excluded, which
    /// is what takes a descriptor out of the set ahead of its removal from
    /// the map.
    #[must_use]
    pub fn watch_set(&self) -> Vec<Arc<Connection>> {
        self.inner
            .lock()
            .values()
            .filter(|c| c.state() == ConnectionState::Open)
            .cloned()
            .collect()
    }

    /// Remove and return every entry (shutdown teardown)
    #[must_use]
    pub fn drain_all(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().drain().map(|(_, c)| c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SocketRegistry;
    use crate::session::EventPeer;
    use tokio::net::{UnixListener, UnixStream};
    use tempfile::tempdir;

    async fn test_connection(dir: &std::path::Path, name: &str) -> Arc<Connection> {
        let path = dir.join(format!("{name}.sock"));
        let listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register(name, &path).unwrap();
        let mapping = registry.resolve(name).unwrap();

        let stream = UnixStream::connect(&path).await.unwrap();
        let _ = listener.accept().await.unwrap();

        let (peer, _rx) = EventPeer::new();
        Connection::new(stream, mapping, Arc::new(peer))
    }

    #[tokio::test]
    async fn test_insert_find_remove() {
        let tmp = tempdir().unwrap();
        let directory = ConnectionDirectory::new();

        let conn = test_connection(tmp.path(), "alpha").await;
        let id = conn.id();

        directory.insert(conn).unwrap();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.find(id).unwrap().channel(), "alpha");

        assert!(directory.remove(id));
        assert!(!directory.remove(id));
        assert!(directory.is_empty());
        assert!(directory.find(id).is_none());
    }

    #[tokio::test]
    async fn test_id_collision_detected() {
        let tmp = tempdir().unwrap();
        let directory = ConnectionDirectory::new();

        let conn = test_connection(tmp.path(), "alpha").await;
        let id = conn.id();

        directory.insert(Arc::clone(&conn)).unwrap();
        let err = directory.insert(conn).unwrap_err();
        assert!(matches!(err, DirectoryError::IdCollision { .. }));

        // Existing entry untouched
        assert_eq!(directory.len(), 1);
        assert!(directory.find(id).is_some());
    }

    #[tokio::test]
    async fn test_watch_set_excludes_closing() {
        let tmp = tempdir().unwrap();
        let directory = ConnectionDirectory::new();

        let a = test_connection(tmp.path(), "alpha").await;
        let b = test_connection(tmp.path(), "beta").await;
        let b_id = b.id();

        directory.insert(a).unwrap();
        directory.insert(Arc::clone(&b)).unwrap();
        assert_eq!(directory.watch_set().len(), 2);

        b.set_state(ConnectionState::Closing);
        let watch = directory.watch_set();
        assert_eq!(watch.len(), 1);
        assert!(watch.iter().all(|c| c.id() != b_id));

        // Still in the directory until the rendezvous completes
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_all() {
        let tmp = tempdir().unwrap();
        let directory = ConnectionDirectory::new();

        directory.insert(test_connection(tmp.path(), "alpha").await).unwrap();
        directory.insert(test_connection(tmp.path(), "beta").await).unwrap();

        let drained = directory.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(directory.is_empty());
    }
}
