//! Fixed-capacity self-connection table.
//!
//! Slots live in an arena allocated once at construction. A slot's index
//! stays the same for the whole lifetime of the connection it holds, and it
//! is what the transport hands back in every per-connection callback.
//!
//! Each slot also carries a generation counter that is bumped on release.
//! A [`SlotKey`] is index plus generation, so a late callback for a
//! connection that has since been released (and whose slot may already hold
//! a new connection) is rejected as stale instead of touching the new
//! occupant.

use selfsync_types::{ConnectionId, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::{LinkEvent, SlotStatus, StatusAction};

/// Default number of simultaneous self-connections.
pub const DEFAULT_CAPACITY: usize = 16;

/// Handle to a table slot, as registered with the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: usize,
    generation: u32,
}

impl SlotKey {
    /// Build a key from its parts. Keys are normally issued by
    /// [`SlotTable::allocate`].
    pub fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation of the slot when this key was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotKey({}@{})", self.index, self.generation)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.index)
    }
}

/// State of one live self-connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfConnection {
    status: SlotStatus,
    connection_id: ConnectionId,
    admitted_at: u64,
    last_ping_sent: Option<u64>,
    last_ping_received: Option<u64>,
}

impl SelfConnection {
    fn new(connection_id: ConnectionId, now: u64) -> Self {
        Self {
            status: SlotStatus::Connecting,
            connection_id,
            admitted_at: now,
            last_ping_sent: None,
            last_ping_received: None,
        }
    }

    /// Current status. Never `Free` for a connection held by the table.
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// Transport handle for this connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// When the connection was admitted.
    pub fn admitted_at(&self) -> u64 {
        self.admitted_at
    }

    /// When we last sent a keepalive successfully, if ever.
    pub fn last_ping_sent(&self) -> Option<u64> {
        self.last_ping_sent
    }

    /// When the peer last proved liveness, if ever.
    pub fn last_ping_received(&self) -> Option<u64> {
        self.last_ping_received
    }

    /// Time the liveness deadline counts from: the last liveness signal, or
    /// the admission time if none has arrived yet.
    pub fn liveness_reference(&self) -> u64 {
        self.last_ping_received.unwrap_or(self.admitted_at)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    conn: Option<SelfConnection>,
}

/// Read-only copy of a slot for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// Slot index.
    pub index: usize,
    /// Slot generation.
    pub generation: u32,
    /// Status (`Free` for unused slots).
    pub status: SlotStatus,
    /// Raw transport handle, if the slot is in use.
    pub connection_id: Option<u32>,
    /// Last successful keepalive send.
    pub last_ping_sent: Option<u64>,
    /// Last liveness signal from the peer.
    pub last_ping_received: Option<u64>,
}

/// The self-connection table.
///
/// Invariant: `active_count()` equals the number of occupied slots and never
/// exceeds `capacity()`.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
    active: usize,
}

impl SlotTable {
    /// Create a table with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots, active: 0 }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Check if no slot is free.
    pub fn is_full(&self) -> bool {
        self.active >= self.slots.len()
    }

    /// Take the first free slot for a newly accepted connection.
    ///
    /// The slot starts out `Connecting`. Fails with
    /// [`SyncError::CapacityExceeded`] when the table is full, leaving every
    /// slot untouched.
    pub fn allocate(
        &mut self,
        connection_id: ConnectionId,
        now: u64,
    ) -> Result<SlotKey, SyncError> {
        let capacity = self.capacity();
        if self.is_full() {
            return Err(SyncError::CapacityExceeded { capacity });
        }

        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.conn.is_none())
            .ok_or(SyncError::CapacityExceeded { capacity })?;

        slot.conn = Some(SelfConnection::new(connection_id, now));
        self.active += 1;
        Ok(SlotKey::new(index, slot.generation))
    }

    /// Free a slot and return the connection it held.
    ///
    /// Idempotent: a free slot or a stale key is a no-op returning `None`.
    pub fn release(&mut self, key: SlotKey) -> Option<SelfConnection> {
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let conn = slot.conn.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.active -= 1;
        Some(conn)
    }

    /// Look up the connection behind a key.
    pub fn get(&self, key: SlotKey) -> Result<&SelfConnection, SyncError> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.conn.as_ref())
            .ok_or(SyncError::StaleSlotReference { slot: key.index })
    }

    fn get_mut(&mut self, key: SlotKey) -> Result<&mut SelfConnection, SyncError> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.conn.as_mut())
            .ok_or(SyncError::StaleSlotReference { slot: key.index })
    }

    /// Apply a link up/down report from the transport.
    ///
    /// Returns the slot's new status. Fails without side effects if the key
    /// is stale.
    pub fn on_link_event(
        &mut self,
        key: SlotKey,
        event: LinkEvent,
        now: u64,
    ) -> Result<SlotStatus, SyncError> {
        let conn = self.get_mut(key)?;
        let (status, actions) = conn.status.on_link_event(event);
        conn.status = status;

        let mut release = false;
        for action in actions {
            match action {
                StatusAction::StampReceived => conn.last_ping_received = Some(now),
                StatusAction::Release => release = true,
            }
        }
        if release {
            self.release(key);
        }

        Ok(status)
    }

    /// Record a keepalive from the peer.
    pub fn record_keepalive(&mut self, key: SlotKey, now: u64) -> Result<(), SyncError> {
        self.get_mut(key)?.last_ping_received = Some(now);
        Ok(())
    }

    /// Record a successful keepalive send.
    ///
    /// Returns `false` if the slot was released in the meantime.
    pub fn mark_ping_sent(&mut self, key: SlotKey, now: u64) -> bool {
        match self.get_mut(key) {
            Ok(conn) => {
                conn.last_ping_sent = Some(now);
                true
            }
            Err(_) => false,
        }
    }

    /// Iterate occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &SelfConnection)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.conn
                .as_ref()
                .map(|conn| (SlotKey::new(index, slot.generation), conn))
        })
    }

    /// Keys and transport handles of every occupied slot.
    pub fn targets(&self) -> Vec<(SlotKey, ConnectionId)> {
        self.iter()
            .map(|(key, conn)| (key, conn.connection_id))
            .collect()
    }

    /// Release every slot, returning what they held.
    pub fn drain(&mut self) -> Vec<(SlotKey, SelfConnection)> {
        let keys: Vec<SlotKey> = self.iter().map(|(key, _)| key).collect();
        keys.into_iter()
            .filter_map(|key| self.release(key).map(|conn| (key, conn)))
            .collect()
    }

    /// Copy of every slot, free ones included.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match &slot.conn {
                Some(conn) => SlotSnapshot {
                    index,
                    generation: slot.generation,
                    status: conn.status,
                    connection_id: Some(conn.connection_id.value()),
                    last_ping_sent: conn.last_ping_sent,
                    last_ping_received: conn.last_ping_received,
                },
                None => SlotSnapshot {
                    index,
                    generation: slot.generation,
                    status: SlotStatus::Free,
                    connection_id: None,
                    last_ping_sent: None,
                    last_ping_received: None,
                },
            })
            .collect()
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
