//! Link state machine for a single self-connection slot.
//!
//! The transport reports link up/down per connection. This module maps
//! those reports onto slot status transitions plus a list of actions for the
//! table to apply. Like the rest of sync-core it performs no I/O.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a table slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    /// Slot is unused. No transport connection belongs to it.
    #[default]
    Free,
    /// Connection accepted, link not yet reported up.
    Connecting,
    /// Link is up.
    Connected,
}

impl SlotStatus {
    /// Process a link event and return the new status plus actions to apply.
    ///
    /// This is a pure function. A `Free` slot ignores every event; callers
    /// reject such events as stale before getting here.
    pub fn on_link_event(self, event: LinkEvent) -> (Self, Vec<StatusAction>) {
        match (self, event) {
            (Self::Connecting | Self::Connected, LinkEvent::Online) => {
                (Self::Connected, vec![StatusAction::StampReceived])
            }
            (Self::Connecting | Self::Connected, LinkEvent::Offline) => {
                (Self::Free, vec![StatusAction::Release])
            }
            (Self::Free, _) => (Self::Free, vec![]),
        }
    }

    /// Check if the slot holds a connection.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Check if the link is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Link status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Underlying link came up.
    Online,
    /// Underlying link went down. The transport has already torn it down.
    Offline,
}

impl From<bool> for LinkEvent {
    fn from(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Effects of a status transition, applied by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Treat the event as a liveness signal: `last_ping_received = now`.
    StampReceived,
    /// Free the slot. No close call is issued.
    Release,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_free() {
        assert_eq!(SlotStatus::default(), SlotStatus::Free);
        assert!(!SlotStatus::Free.is_active());
    }

    #[test]
    fn online_from_connecting_connects_and_stamps() {
        let (status, actions) = SlotStatus::Connecting.on_link_event(LinkEvent::Online);
        assert_eq!(status, SlotStatus::Connected);
        assert_eq!(actions, vec![StatusAction::StampReceived]);
    }

    #[test]
    fn online_again_restamps() {
        let (status, actions) = SlotStatus::Connected.on_link_event(LinkEvent::Online);
        assert_eq!(status, SlotStatus::Connected);
        assert_eq!(actions, vec![StatusAction::StampReceived]);
    }

    #[test]
    fn offline_releases_from_any_active_state() {
        for from in [SlotStatus::Connecting, SlotStatus::Connected] {
            let (status, actions) = from.on_link_event(LinkEvent::Offline);
            assert_eq!(status, SlotStatus::Free);
            assert_eq!(actions, vec![StatusAction::Release]);
        }
    }

    #[test]
    fn free_slot_ignores_events() {
        for event in [LinkEvent::Online, LinkEvent::Offline] {
            let (status, actions) = SlotStatus::Free.on_link_event(event);
            assert_eq!(status, SlotStatus::Free);
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn link_event_from_bool() {
        assert_eq!(LinkEvent::from(true), LinkEvent::Online);
        assert_eq!(LinkEvent::from(false), LinkEvent::Offline);
    }

    #[test]
    fn status_helpers() {
        assert!(SlotStatus::Connecting.is_active());
        assert!(!SlotStatus::Connecting.is_connected());
        assert!(SlotStatus::Connected.is_active());
        assert!(SlotStatus::Connected.is_connected());
    }
}
