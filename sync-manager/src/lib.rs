//! # sync-manager
//!
//! Self-connection manager for selfsync.
//!
//! Every device that runs under the same identity key opens an encrypted
//! link to every other such device. This crate owns the table of those
//! links and keeps them useful.
//!
//! ## Features
//!
//! - **Same-identity admission**: only inbound connections presenting our
//!   own public key are accepted, up to a fixed table capacity
//! - **Liveness**: periodic keepalives and timeout-driven teardown
//! - **Friend-state sync**: broadcast of friend changes to every device,
//!   with received name changes handed to the host
//! - **Transport abstraction**: pluggable encrypted transport (mock included)
//! - **Pure core**: table and liveness decisions come from sync-core
//!
//! ## Example
//!
//! ```ignore
//! use selfsync_manager::{NoopCallbacks, SelfConnections, SelfSyncConfig};
//!
//! let config = SelfSyncConfig::default();
//! let manager = SelfConnections::create(transport, Arc::new(NoopCallbacks), &config)?;
//!
//! // Once a second
//! manager.tick();
//!
//! // Tell our other devices that a friend was renamed
//! manager.sync_friend_state(friend_id, PacketId::FriendName, b"Bob");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod manager;
pub mod task;
pub mod transport;

pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use config::{ConfigError, LivenessConfig, SelfSyncConfig, TableConfig};
pub use manager::{ManagerError, NoopCallbacks, SelfCallbacks, SelfConnections, TickReport};
pub use task::spawn_liveness_task;
pub use transport::{
    ConnectionHandler, CryptoTransport, InboundHandler, InboundRequest, MockTransport,
    PendingToken, TransportError,
};
