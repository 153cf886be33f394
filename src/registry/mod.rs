//! Socket registry
//!
//! Maps channel names to backend socket addresses and I/O parameters.
//! The registry is built once at startup from configuration and is
//! read-only for the process lifetime, so lookups need no synchronization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::RegistryError;

/// Default per-channel read buffer hint in bytes
pub const DEFAULT_BUFFER_HINT: usize = 1024;

/// Backend transport kinds
///
/// Only Unix stream sockets are supported; the enum leaves room for
/// other local transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// `SOCK_STREAM` Unix domain socket
    UnixStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnixStream => write!(f, "unix-stream"),
        }
    }
}

/// One channel-name-to-backend-socket mapping
///
/// Immutable after registry construction. Identity is the channel name.
#[derive(Debug)]
pub struct ChannelMapping {
    name: String,
    address: PathBuf,
    transport_kind: TransportKind,
    buffer_hint: usize,
}

impl ChannelMapping {
    /// Channel name (unique within the registry)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend socket path
    #[must_use]
    pub fn address(&self) -> &Path {
        &self.address
    }

    /// Backend transport kind
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    /// Suggested read buffer size for this channel
    #[must_use]
    pub fn buffer_hint(&self) -> usize {
        self.buffer_hint
    }

    /// Verify the backend address still points at a socket of the expected
    /// transport kind.
    ///
    /// Called at registration and again at open time: the backend daemon
    /// may have gone away between the two.
    pub fn verify_address(&self) -> Result<(), RegistryError> {
        verify_socket_path(&self.address)
    }
}

/// Check that a path exists and is a Unix socket
fn verify_socket_path(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::FileTypeExt;

    let meta = std::fs::metadata(path)
        .map_err(|e| RegistryError::invalid_address(path, e.to_string()))?;

    if !meta.file_type().is_socket() {
        return Err(RegistryError::invalid_address(path, "not a socket"));
    }

    Ok(())
}

/// Registry of channel mappings, sorted by name
#[derive(Debug, Default)]
pub struct SocketRegistry {
    channels: Vec<Arc<ChannelMapping>>,
}

impl SocketRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from channel configuration entries
    ///
    /// # Errors
    ///
    /// Returns the first `RegistryError` encountered; startup should treat
    /// any failure here as fatal.
    pub fn from_channels(channels: &[ChannelConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for ch in channels {
            registry.register_with_hint(&ch.name, &ch.socket, ch.buffer_hint)?;
        }
        Ok(registry)
    }

    /// Register a channel with the default buffer hint
    ///
    /// # Errors
    ///
    /// Returns `DuplicateChannel` if the name is already present, or
    /// `InvalidAddress` if the address does not resolve to a usable local
    /// socket at validation time.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        address: impl Into<PathBuf>,
    ) -> Result<(), RegistryError> {
        self.register_with_hint(name, address, DEFAULT_BUFFER_HINT)
    }

    /// Register a channel with an explicit buffer hint
    pub fn register_with_hint(
        &mut self,
        name: impl Into<String>,
        address: impl Into<PathBuf>,
        buffer_hint: usize,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let address = address.into();

        // Only one mapping per channel name is allowed.
        let slot = match self.channels.binary_search_by(|m| m.name.as_str().cmp(&name)) {
            Ok(_) => return Err(RegistryError::DuplicateChannel { name }),
            Err(slot) => slot,
        };

        verify_socket_path(&address)?;

        debug!(channel = %name, address = %address.display(), "registered channel");

        self.channels.insert(
            slot,
            Arc::new(ChannelMapping {
                name,
                address,
                transport_kind: TransportKind::UnixStream,
                buffer_hint: buffer_hint.max(1),
            }),
        );
        Ok(())
    }

    /// Resolve a channel name to its mapping
    ///
    /// The search is linear: registries hold tens of channels, not
    /// thousands, and never change after startup. Switching to a binary
    /// search over the sorted vec is trivial if that ever changes.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if the name is absent.
    pub fn resolve(&self, name: &str) -> Result<Arc<ChannelMapping>, RegistryError> {
        self.channels
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChannel { name: name.into() })
    }

    /// Number of registered channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Registered channel names, in sorted order
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|m| m.name.as_str()).collect()
    }

    /// Largest buffer hint across all channels
    ///
    /// The multiplexer sizes its shared scratch buffer from this.
    #[must_use]
    pub fn max_buffer_hint(&self) -> usize {
        self.channels
            .iter()
            .map(|m| m.buffer_hint)
            .max()
            .unwrap_or(DEFAULT_BUFFER_HINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    #[test]
    fn test_register_and_resolve() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register("alpha", &path).unwrap();

        let mapping = registry.resolve("alpha").unwrap();
        assert_eq!(mapping.name(), "alpha");
        assert_eq!(mapping.address(), path.as_path());
        assert_eq!(mapping.transport_kind(), TransportKind::UnixStream);
        assert_eq!(mapping.buffer_hint(), DEFAULT_BUFFER_HINT);
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut registry = SocketRegistry::new();
        registry.register("alpha", &path).unwrap();

        let err = registry.register("alpha", &path).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChannel { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_channel() {
        let registry = SocketRegistry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownChannel { .. }));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let dir = tempdir().unwrap();

        let mut registry = SocketRegistry::new();

        // Nonexistent path
        let err = registry
            .register("alpha", dir.path().join("missing.sock"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));

        // Exists but is a regular file
        let file_path = dir.path().join("not-a-socket");
        std::fs::write(&file_path, b"x").unwrap();
        let err = registry.register("beta", &file_path).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));

        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_sorted() {
        let dir = tempdir().unwrap();
        let mut registry = SocketRegistry::new();
        let mut listeners = Vec::new();
        for name in ["zeta", "alpha", "mid"] {
            let path = dir.path().join(format!("{name}.sock"));
            listeners.push(UnixListener::bind(&path).unwrap());
            registry.register(name, &path).unwrap();
        }
        assert_eq!(registry.channel_names(), vec!["alpha", "mid", "zeta"]);
    }
}
