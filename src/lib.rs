//! sockbridge: Unix-socket bridging relay engine
//!
//! This crate relays bytes between client-facing sessions and local
//! backend daemons listening on Unix domain sockets. A session layer
//! (for example a websocket server) asks the engine to open a named
//! channel; the engine connects to the configured backend socket and
//! shuttles bytes both ways until either side closes.
//!
//! # Features
//!
//! - **Named Channels**: Clients request backends by name, never by path
//! - **Single Multiplexer Loop**: One task owns the readiness set for
//!   every backend socket
//! - **Rendezvous Commands**: Open and close block until the loop has
//!   applied the change, so callers never race the readiness set
//! - **Statistics**: Lifecycle and byte counters with JSON snapshots
//!
//! # Architecture
//!
//! ```text
//! Session layer → Bridge::open/relay_in/close → Connection Directory
//!                                                     ↓
//!                       Multiplexer loop ← commands (add/del/shutdown)
//!                             ↓
//!                  backend Unix sockets → SessionPeer::deliver
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockbridge::{Bridge, EventPeer, SocketRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = SocketRegistry::new();
//! registry.register("vpn", "/run/vpn.sock")?;
//!
//! let bridge = Bridge::start(registry);
//!
//! let (peer, mut events) = EventPeer::new();
//! let id = bridge.open("vpn", Arc::new(peer)).await?;
//!
//! bridge.relay_in(id, bytes::Bytes::from_static(b"hello")).await?;
//! // ... consume backend bytes from `events` ...
//! bridge.close(id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`bridge`]: Engine facade tying the pieces together
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Per-connection record and socket I/O
//! - [`directory`]: Live connection directory
//! - [`error`]: Error types
//! - [`mux`]: The I/O multiplexer loop and its command channel
//! - [`queue`]: Per-connection outbound message queue
//! - [`registry`]: Channel-name-to-socket registry
//! - [`session`]: Session-peer trait and channel-backed adapter
//! - [`stats`]: Relay statistics

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod mux;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;

// Re-export commonly used types at the crate root
pub use bridge::Bridge;
pub use config::{ChannelConfig, Config, EngineConfig, LogConfig};
pub use connection::{Connection, ConnectionState};
pub use directory::ConnectionDirectory;
pub use error::{
    BridgeError, ConfigError, DirectoryError, MuxError, OpenError, RegistryError, Result,
};
pub use mux::MuxHandle;
pub use queue::{Message, MessageQueue};
pub use registry::{ChannelMapping, SocketRegistry, TransportKind};
pub use session::{EventPeer, SessionEvent, SessionPeer};
pub use stats::{RelayStats, StatsSnapshot};

/// Connection identifier: the backend socket's raw file descriptor
///
/// The kernel guarantees fd uniqueness among open descriptors, which makes
/// it a natural directory key. Reuse after close is expected; reuse while
/// an entry is still live is a defect the directory reports loudly.
pub type ConnId = std::os::unix::io::RawFd;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
