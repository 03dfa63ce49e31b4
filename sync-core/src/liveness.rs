//! Keepalive and timeout planning.
//!
//! [`LivenessPolicy::plan`] looks at every occupied slot and says which ones
//! need a keepalive and which ones have gone quiet for too long. It does not
//! send or close anything; the manager executes the returned actions and
//! reports send results back to the table.

use selfsync_types::ConnectionId;

use crate::table::{SelfConnection, SlotKey, SlotTable};

/// Default keepalive cadence in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 7;

/// Default silence after which a connection is declared dead.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = DEFAULT_PING_INTERVAL_SECS * 3;

/// Keepalive and timeout thresholds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    ping_interval: u64,
    connection_timeout: u64,
}

impl LivenessPolicy {
    /// Create a policy.
    pub fn new(ping_interval: u64, connection_timeout: u64) -> Self {
        Self {
            ping_interval,
            connection_timeout,
        }
    }

    /// Keepalive cadence.
    pub fn ping_interval(&self) -> u64 {
        self.ping_interval
    }

    /// Silence threshold.
    pub fn connection_timeout(&self) -> u64 {
        self.connection_timeout
    }

    /// Check if a keepalive should be sent now.
    ///
    /// A connection that never sent one is always due.
    pub fn ping_due(&self, conn: &SelfConnection, now: u64) -> bool {
        match conn.last_ping_sent() {
            Some(sent) => now.saturating_sub(sent) >= self.ping_interval,
            None => true,
        }
    }

    /// Check if the peer has been silent for too long.
    pub fn expired(&self, conn: &SelfConnection, now: u64) -> bool {
        now.saturating_sub(conn.liveness_reference()) >= self.connection_timeout
    }

    /// Work for one tick, in slot order.
    ///
    /// The two checks are independent: a slot may get both a `SendPing` and
    /// an `Expire`, in that order. Sending a ping does not affect the
    /// timeout check, which only looks at received liveness.
    pub fn plan(&self, table: &SlotTable, now: u64) -> Vec<LivenessAction> {
        let mut actions = Vec::new();
        for (key, conn) in table.iter() {
            let connection_id = conn.connection_id();
            if self.ping_due(conn, now) {
                actions.push(LivenessAction::SendPing { key, connection_id });
            }
            if self.expired(conn, now) {
                actions.push(LivenessAction::Expire { key, connection_id });
            }
        }
        actions
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL_SECS, DEFAULT_CONNECTION_TIMEOUT_SECS)
    }
}

/// Actions to be executed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Send a keepalive; on success record it with
    /// [`SlotTable::mark_ping_sent`].
    SendPing {
        /// Slot to ping.
        key: SlotKey,
        /// Its transport handle.
        connection_id: ConnectionId,
    },
    /// Close the transport connection and release the slot.
    Expire {
        /// Slot that timed out.
        key: SlotKey,
        /// Its transport handle.
        connection_id: ConnectionId,
    },
}

impl LivenessAction {
    /// Slot this action is about.
    pub fn key(&self) -> SlotKey {
        match self {
            LivenessAction::SendPing { key, .. } | LivenessAction::Expire { key, .. } => *key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LinkEvent;

    fn policy() -> LivenessPolicy {
        LivenessPolicy::new(7, 21)
    }

    #[test]
    fn defaults() {
        let p = LivenessPolicy::default();
        assert_eq!(p.ping_interval(), 7);
        assert_eq!(p.connection_timeout(), 21);
    }

    #[test]
    fn never_pinged_is_due_immediately() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 0).unwrap();
        let actions = policy().plan(&table, 0);
        assert_eq!(
            actions,
            vec![LivenessAction::SendPing {
                key,
                connection_id: ConnectionId::new(1)
            }]
        );
    }

    #[test]
    fn ping_due_at_exactly_interval() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 0).unwrap();
        table.mark_ping_sent(key, 10);

        let p = policy();
        let conn = table.get(key).unwrap();
        assert!(!p.ping_due(conn, 16));
        assert!(p.ping_due(conn, 17));
    }

    #[test]
    fn connecting_slot_times_out_from_admission() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 100).unwrap();

        let p = policy();
        let conn = table.get(key).unwrap();
        assert!(!p.expired(conn, 120));
        assert!(p.expired(conn, 121));
        assert!(p.plan(&table, 121).contains(&LivenessAction::Expire {
            key,
            connection_id: ConnectionId::new(1)
        }));
    }

    #[test]
    fn ping_then_expire_in_same_tick() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 0).unwrap();
        table.mark_ping_sent(key, 0);

        let actions = policy().plan(&table, 21);
        assert_eq!(
            actions,
            vec![
                LivenessAction::SendPing {
                    key,
                    connection_id: ConnectionId::new(1)
                },
                LivenessAction::Expire {
                    key,
                    connection_id: ConnectionId::new(1)
                },
            ]
        );
    }

    #[test]
    fn connected_at_zero_expires_at_twenty_two() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(9), 0).unwrap();
        table.on_link_event(key, LinkEvent::Online, 0).unwrap();

        let actions = policy().plan(&table, 22);
        let expires: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, LivenessAction::Expire { .. }))
            .collect();
        assert_eq!(expires.len(), 1);
        assert_eq!(expires[0].key(), key);
    }

    #[test]
    fn keepalive_postpones_timeout() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 0).unwrap();
        table.on_link_event(key, LinkEvent::Online, 0).unwrap();
        table.record_keepalive(key, 15).unwrap();

        let p = policy();
        let conn = table.get(key).unwrap();
        assert!(!p.expired(conn, 35));
        assert!(p.expired(conn, 36));
    }

    #[test]
    fn sending_ping_does_not_affect_timeout() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 0).unwrap();
        table.on_link_event(key, LinkEvent::Online, 0).unwrap();
        table.mark_ping_sent(key, 20);

        assert!(policy().expired(table.get(key).unwrap(), 21));
    }

    #[test]
    fn plan_skips_free_slots() {
        let mut table = SlotTable::new(3);
        let a = table.allocate(ConnectionId::new(1), 0).unwrap();
        let b = table.allocate(ConnectionId::new(2), 0).unwrap();
        table.release(a);

        let actions = policy().plan(&table, 0);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].key(), b);
    }

    #[test]
    fn clock_going_backwards_does_not_expire() {
        let mut table = SlotTable::new(1);
        let key = table.allocate(ConnectionId::new(1), 50).unwrap();
        assert!(!policy().expired(table.get(key).unwrap(), 10));
    }
}
