//! Crypto transport abstraction for selfsync.
//!
//! The manager sits on top of an encrypted point-to-point transport that it
//! does not own. This module describes what it needs from that transport and
//! what the transport calls back into.
//!
//! # Design
//!
//! The transport trait is synchronous and callback-driven:
//! - `accept_pending()` finalizes an inbound connection request
//! - `send_packet()` queues an encrypted, reliable, ordered packet
//! - `close_connection()` kills a connection
//! - `on_*()` register per-connection handlers keyed by a [`SlotKey`]
//!
//! None of these may block. Handlers are registered as [`Weak`] references,
//! so a transport never keeps a dropped manager alive; a transport whose
//! handler no longer upgrades simply stops delivering to it.
//!
//! The manager holds no lock while it calls into the transport, so handlers
//! may be invoked from inside any of these calls, on the calling thread or
//! another. A status handler invoked from inside `close_connection` lands on
//! a slot the manager has already released and is ignored.

mod mock;

pub use mock::MockTransport;

use selfsync_core::SlotKey;
use selfsync_types::{ConnectionId, PublicKey, SyncError};
use std::sync::Weak;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection handle is not known to the transport.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Connection exists but is not up.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Pending connection could not be accepted.
    #[error("accept failed: {0}")]
    AcceptFailed(String),

    /// Handler registration was refused.
    #[error("handler registration failed: {0}")]
    RegistrationFailed(String),
}

/// Opaque handle to a connection request awaiting acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken(u64);

impl PendingToken {
    /// Wrap a transport-assigned token.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Descriptor of an inbound connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundRequest {
    /// Identity the remote claims.
    pub public_key: PublicKey,
    /// Token to pass to [`CryptoTransport::accept_pending`].
    pub token: PendingToken,
}

/// Per-connection callbacks, invoked by the transport.
///
/// Every method may be called with a key whose slot has been released in the
/// meantime; implementations must then fail without side effects.
pub trait ConnectionHandler: Send + Sync {
    /// The underlying link went up (`true`) or down (`false`).
    fn handle_status(&self, key: SlotKey, online: bool) -> Result<(), SyncError>;

    /// A reliable application packet arrived.
    fn handle_packet(&self, key: SlotKey, data: &[u8]) -> Result<(), SyncError>;

    /// A lossy application packet arrived.
    fn handle_lossy_packet(&self, key: SlotKey, data: &[u8]) -> Result<(), SyncError>;
}

/// Callback for inbound connection requests.
///
/// Returning an error refuses the request; the transport discards it.
pub trait InboundHandler: Send + Sync {
    /// Decide on an inbound connection request.
    fn handle_inbound(&self, request: InboundRequest) -> Result<(), SyncError>;
}

/// The encrypted transport the manager runs on.
///
/// Implementations handle key exchange, encryption and framing; the
/// manager only sees plaintext application payloads.
pub trait CryptoTransport: Send + Sync {
    /// Our own long-term public key.
    fn self_public_key(&self) -> PublicKey;

    /// Finalize a pending inbound connection.
    fn accept_pending(&self, token: PendingToken) -> Result<ConnectionId, TransportError>;

    /// Send a reliable packet. Returns the number of bytes queued.
    fn send_packet(&self, connection: ConnectionId, data: &[u8]) -> Result<usize, TransportError>;

    /// Kill a connection.
    fn close_connection(&self, connection: ConnectionId) -> Result<(), TransportError>;

    /// Register the link status handler for a connection.
    fn on_status_change(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError>;

    /// Register the reliable packet handler for a connection.
    fn on_data_packet(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError>;

    /// Register the lossy packet handler for a connection.
    fn on_lossy_packet(
        &self,
        connection: ConnectionId,
        handler: Weak<dyn ConnectionHandler>,
        key: SlotKey,
    ) -> Result<(), TransportError>;

    /// Register the handler for inbound connection requests.
    fn on_inbound_request(&self, handler: Weak<dyn InboundHandler>);
}
