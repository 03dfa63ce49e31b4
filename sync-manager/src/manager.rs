//! The self-connection manager.
//!
//! [`SelfConnections`] keeps the table of live connections to our own other
//! devices. It admits inbound connections that present our own identity,
//! tracks their link status, answers keepalives, expires silent peers and
//! broadcasts friend-state changes to every device.
//!
//! The table sits behind one mutex. Transport calls are never made while it
//! is held, so a transport may call back into the manager from inside any of
//! them.

use crate::clock::{MonotonicClock, TimeSource};
use crate::config::{ConfigError, SelfSyncConfig};
use crate::transport::{
    ConnectionHandler, CryptoTransport, InboundHandler, InboundRequest, TransportError,
};
use selfsync_core::{LinkEvent, LivenessAction, LivenessPolicy, SlotKey, SlotSnapshot, SlotTable};
use selfsync_types::{
    encode_keepalive, encode_sync_frame, ConnectionId, FriendId, PacketId, PublicKey, SelfPacket,
    SyncError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Upstream notifications raised by sync traffic from our other devices.
pub trait SelfCallbacks: Send + Sync {
    /// Another device of ours saw a friend change their name.
    ///
    /// `name` is opaque and not guaranteed to be UTF-8.
    fn on_friend_name_changed(&self, friend_id: FriendId, name: &[u8]);
}

/// Callbacks that ignore everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl SelfCallbacks for NoopCallbacks {
    fn on_friend_name_changed(&self, _friend_id: FriendId, _name: &[u8]) {}
}

/// Errors from creating a manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What one liveness tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Keepalives sent.
    pub pinged: usize,
    /// Keepalives the transport refused; retried next tick.
    pub ping_failures: usize,
    /// Slots released for silence.
    pub expired: Vec<SlotKey>,
}

impl TickReport {
    /// Check if the tick did nothing at all.
    pub fn is_idle(&self) -> bool {
        self.pinged == 0 && self.ping_failures == 0 && self.expired.is_empty()
    }
}

/// Manager of connections to our own other devices.
///
/// Dropping the manager closes every connection, same as
/// [`SelfConnections::destroy`].
pub struct SelfConnections<T: CryptoTransport + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: CryptoTransport + 'static> {
    transport: Arc<T>,
    callbacks: Arc<dyn SelfCallbacks>,
    clock: Arc<dyn TimeSource>,
    policy: LivenessPolicy,
    local_key: PublicKey,
    table: Mutex<SlotTable>,
    this: Weak<Shared<T>>,
}

impl<T: CryptoTransport + 'static> SelfConnections<T> {
    /// Create a manager and register it for inbound requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn create(
        transport: Arc<T>,
        callbacks: Arc<dyn SelfCallbacks>,
        config: &SelfSyncConfig,
    ) -> Result<Self, ManagerError> {
        Self::with_clock(
            transport,
            callbacks,
            config,
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Create a manager reading time from `clock`.
    pub fn with_clock(
        transport: Arc<T>,
        callbacks: Arc<dyn SelfCallbacks>,
        config: &SelfSyncConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;

        let local_key = transport.self_public_key();
        let shared = Arc::new_cyclic(|this| Shared {
            transport,
            callbacks,
            clock,
            policy: config.policy(),
            local_key,
            table: Mutex::new(SlotTable::new(config.table.capacity)),
            this: this.clone(),
        });

        let inbound: Weak<dyn InboundHandler> = shared.this.clone();
        shared.transport.on_inbound_request(inbound);

        tracing::info!(
            "Self-connection manager ready (key {}, capacity {}, ping {}s, timeout {}s)",
            local_key,
            config.table.capacity,
            config.liveness.ping_interval_secs,
            config.liveness.timeout_secs
        );

        Ok(Self { shared })
    }

    /// Run one liveness pass: send due keepalives, expire silent peers.
    ///
    /// Call on a steady cadence finer than the ping interval.
    pub fn tick(&self) -> TickReport {
        self.shared.tick()
    }

    /// Send a friend-state change to every device we hold a connection to.
    ///
    /// Fire-and-forget: failures are logged, not retried. Returns how many
    /// devices the transport accepted the frame for.
    pub fn sync_friend_state(&self, friend_id: FriendId, id: PacketId, payload: &[u8]) -> usize {
        self.shared.broadcast(friend_id, id, payload)
    }

    /// Close every connection and drop the manager.
    pub fn destroy(self) {
        self.shared.shutdown();
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.shared.table().active_count()
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.shared.table().capacity()
    }

    /// Copy of every slot.
    pub fn connections(&self) -> Vec<SlotSnapshot> {
        self.shared.table().snapshot()
    }

    /// Our identity, as read from the transport at creation.
    pub fn local_key(&self) -> PublicKey {
        self.shared.local_key
    }

    /// The transport this manager runs on.
    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }
}

impl<T: CryptoTransport + 'static> Drop for SelfConnections<T> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl<T: CryptoTransport + 'static> Shared<T> {
    fn table(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, conn: ConnectionId, key: SlotKey) -> Result<(), TransportError> {
        let handler: Weak<dyn ConnectionHandler> = self.this.clone();
        let transport = &self.transport;
        transport.on_status_change(conn, handler.clone(), key)?;
        transport.on_data_packet(conn, handler.clone(), key)?;
        transport.on_lossy_packet(conn, handler, key)
    }

    fn close(&self, connection_id: ConnectionId) {
        if let Err(e) = self.transport.close_connection(connection_id) {
            tracing::debug!("Close of {} failed: {}", connection_id, e);
        }
    }

    fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let actions = self.policy.plan(&self.table(), now);
        let keepalive = encode_keepalive();
        let mut report = TickReport::default();

        for action in actions {
            match action {
                LivenessAction::SendPing { key, connection_id } => {
                    match self.transport.send_packet(connection_id, &keepalive) {
                        Ok(_) => {
                            let recorded = self.table().mark_ping_sent(key, now);
                            if recorded {
                                tracing::debug!("Keepalive sent to {} ({})", key, connection_id);
                                report.pinged += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Keepalive to {} failed: {}", key, e);
                            report.ping_failures += 1;
                        }
                    }
                }
                LivenessAction::Expire { key, connection_id } => {
                    if !self.release_if_expired(key, now) {
                        continue;
                    }
                    tracing::warn!("{}", SyncError::TimeoutExpired { slot: key.index() });
                    self.close(connection_id);
                    report.expired.push(key);
                }
            }
        }

        report
    }

    /// Release `key` only if it is still silent at `now`.
    ///
    /// The plan is made before any keepalive goes out, so a reply that
    /// arrived since then keeps the slot.
    fn release_if_expired(&self, key: SlotKey, now: u64) -> bool {
        let mut table = self.table();
        let expired = match table.get(key) {
            Ok(conn) => self.policy.expired(conn, now),
            Err(_) => false,
        };
        expired && table.release(key).is_some()
    }

    fn broadcast(&self, friend_id: FriendId, id: PacketId, payload: &[u8]) -> usize {
        let frame = encode_sync_frame(id, friend_id, payload);
        let targets = self.table().targets();

        let mut delivered = 0;
        for (key, connection_id) in targets {
            match self.transport.send_packet(connection_id, &frame) {
                Ok(_) => delivered += 1,
                Err(e) => tracing::warn!(
                    "{}",
                    SyncError::TransportSendFailure(format!("{:?} to {}: {}", id, key, e))
                ),
            }
        }

        tracing::debug!(
            "Broadcast {:?} for {} to {}/{} devices",
            id,
            friend_id,
            delivered,
            self.table().active_count()
        );
        delivered
    }

    fn shutdown(&self) {
        let drained = self.table().drain();
        for (key, conn) in drained {
            tracing::info!("Closing {} ({})", key, conn.connection_id());
            self.close(conn.connection_id());
        }
    }

    fn ensure_live(&self, key: SlotKey) -> Result<(), SyncError> {
        let result = self.table().get(key).map(|_| ());
        if let Err(e) = &result {
            tracing::debug!("Ignoring callback: {}", e);
        }
        result
    }
}

impl<T: CryptoTransport + 'static> InboundHandler for Shared<T> {
    fn handle_inbound(&self, request: InboundRequest) -> Result<(), SyncError> {
        if request.public_key != self.local_key {
            tracing::warn!(
                "Refusing inbound connection from foreign key {}",
                request.public_key
            );
            return Err(SyncError::IdentityMismatch);
        }

        // Refuse before accepting so a full table never strands a connection.
        let (full, capacity) = {
            let table = self.table();
            (table.is_full(), table.capacity())
        };
        if full {
            tracing::warn!("Refusing self-connection, table full ({})", capacity);
            return Err(SyncError::CapacityExceeded { capacity });
        }

        let connection_id = self
            .transport
            .accept_pending(request.token)
            .map_err(|e| SyncError::AcceptFailed(e.to_string()))?;

        let now = self.clock.now();
        let allocated = self.table().allocate(connection_id, now);
        let key = match allocated {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Lost the last slot while accepting {}", connection_id);
                self.close(connection_id);
                return Err(e);
            }
        };

        if let Err(e) = self.register(connection_id, key) {
            tracing::warn!("Handler registration for {} failed: {}", connection_id, e);
            self.table().release(key);
            self.close(connection_id);
            return Err(SyncError::AcceptFailed(e.to_string()));
        }

        tracing::info!("Admitted self-connection {} on {}", connection_id, key);
        Ok(())
    }
}

impl<T: CryptoTransport + 'static> ConnectionHandler for Shared<T> {
    fn handle_status(&self, key: SlotKey, online: bool) -> Result<(), SyncError> {
        let now = self.clock.now();
        let event = LinkEvent::from(online);
        let result = self.table().on_link_event(key, event, now);
        match result {
            Ok(status) if status.is_connected() => {
                tracing::info!("Self-connection on {} is online", key);
                Ok(())
            }
            Ok(_) => {
                tracing::info!("Self-connection on {} went offline, slot released", key);
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Ignoring status change: {}", e);
                Err(e)
            }
        }
    }

    fn handle_packet(&self, key: SlotKey, data: &[u8]) -> Result<(), SyncError> {
        if data.is_empty() {
            return Err(SyncError::malformed("empty payload"));
        }
        self.ensure_live(key)?;

        match SelfPacket::decode(data) {
            Ok(SelfPacket::Alive) => {
                let now = self.clock.now();
                self.table().record_keepalive(key, now)?;
                tracing::debug!("Keepalive from {}", key);
            }
            Ok(SelfPacket::FriendName { friend_id, name }) => {
                tracing::debug!("Friend {} renamed via {}", friend_id, key);
                self.callbacks.on_friend_name_changed(friend_id, name);
            }
            Ok(SelfPacket::Reserved { id, body }) => {
                tracing::debug!("Ignoring {:?} ({}B) from {}", id, body.len(), key);
            }
            Ok(other) => {
                tracing::debug!("Ignoring tag {} from {}", other.tag(), key);
            }
            Err(e) => {
                tracing::debug!("Dropping packet from {}: {}", key, e);
            }
        }
        Ok(())
    }

    fn handle_lossy_packet(&self, key: SlotKey, data: &[u8]) -> Result<(), SyncError> {
        if data.is_empty() {
            return Err(SyncError::malformed("empty lossy payload"));
        }
        self.ensure_live(key)
    }
}
