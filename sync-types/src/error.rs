//! Error types for selfsync.

use thiserror::Error;

/// Errors that can occur in selfsync operations.
///
/// None of these are fatal to the host process. The worst outcome is a
/// dropped or delayed self-connection, which is re-established by the next
/// inbound connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Connection table is full, admission refused.
    #[error("self-connection table full (capacity: {capacity})")]
    CapacityExceeded {
        /// Table capacity.
        capacity: usize,
    },

    /// Inbound connection claims a different identity.
    #[error("inbound connection identity does not match local identity")]
    IdentityMismatch,

    /// Packet too short or otherwise invalid.
    #[error("malformed packet: {reason}")]
    MalformedPacket {
        /// What was wrong with the packet.
        reason: String,
    },

    /// Callback arrived for a free or reused slot.
    #[error("stale reference to slot {slot}")]
    StaleSlotReference {
        /// Slot index the callback was keyed with.
        slot: usize,
    },

    /// Transport refused or failed to send.
    #[error("transport send failed: {0}")]
    TransportSendFailure(String),

    /// Transport could not finalize a pending connection.
    #[error("transport accept failed: {0}")]
    AcceptFailed(String),

    /// Liveness timeout expired for a slot.
    #[error("connection in slot {slot} timed out")]
    TimeoutExpired {
        /// Slot index that timed out.
        slot: usize,
    },

    /// Tag byte outside the self-sync packet range.
    #[error("unknown packet id: {0}")]
    UnknownPacketId(u8),
}

impl SyncError {
    /// Shorthand for [`SyncError::MalformedPacket`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::CapacityExceeded { capacity: 16 };
        assert_eq!(err.to_string(), "self-connection table full (capacity: 16)");

        let err = SyncError::UnknownPacketId(99);
        assert_eq!(err.to_string(), "unknown packet id: 99");
    }

    #[test]
    fn malformed_shorthand() {
        let err = SyncError::malformed("empty payload");
        assert_eq!(err.to_string(), "malformed packet: empty payload");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
