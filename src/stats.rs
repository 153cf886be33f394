//! Relay statistics tracking
//!
//! Atomic counters covering the lifecycle and data paths of the engine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic relay statistics
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Connections opened successfully
    opened: AtomicU64,
    /// Connections closed by the session layer
    closed: AtomicU64,
    /// Connections torn down because the backend dropped
    backend_drops: AtomicU64,
    /// `open` calls that failed
    open_failures: AtomicU64,
    /// Bytes relayed client -> backend
    bytes_to_backend: AtomicU64,
    /// Bytes relayed backend -> client
    bytes_to_client: AtomicU64,
}

impl RelayStats {
    /// Create new relay statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful open
    pub fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session-initiated close
    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend-side drop
    pub fn record_backend_drop(&self) {
        self.backend_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed open
    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes written toward the backend
    pub fn record_bytes_to_backend(&self, n: u64) {
        self.bytes_to_backend.fetch_add(n, Ordering::Relaxed);
    }

    /// Record bytes delivered toward the client session
    pub fn record_bytes_to_client(&self, n: u64) {
        self.bytes_to_client.fetch_add(n, Ordering::Relaxed);
    }

    /// Get opened count
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Get closed count
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Get backend drop count
    #[must_use]
    pub fn backend_drops(&self) -> u64 {
        self.backend_drops.load(Ordering::Relaxed)
    }

    /// Get open failure count
    #[must_use]
    pub fn open_failures(&self) -> u64 {
        self.open_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opened: self.opened(),
            closed: self.closed(),
            backend_drops: self.backend_drops(),
            open_failures: self.open_failures(),
            bytes_to_backend: self.bytes_to_backend.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the relay statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub opened: u64,
    pub closed: u64,
    pub backend_drops: u64,
    pub open_failures: u64,
    pub bytes_to_backend: u64,
    pub bytes_to_client: u64,
}
