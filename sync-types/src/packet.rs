//! Self-sync packet format.
//!
//! Every packet exchanged between devices of one identity starts with a
//! one-byte [`PacketId`] tag. Friend-related packets follow the tag with a
//! 4-byte little-endian [`FriendId`] and an opaque body:
//!
//! ```text
//! +-----+-----------------+------------------+
//! | tag | friend id (LE)  | body ...         |
//! | 1B  | 4B              | 0..n bytes       |
//! +-----+-----------------+------------------+
//! ```
//!
//! The keepalive is the bare tag.

use serde::{Deserialize, Serialize};

use crate::{FriendId, SyncError};

/// Width of the friend identifier on the wire.
pub const FRIEND_ID_SIZE: usize = 4;

/// Tag plus friend identifier.
pub const SYNC_HEADER_SIZE: usize = 1 + FRIEND_ID_SIZE;

/// Self-sync packet tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketId {
    /// Liveness keepalive
    Alive = 32,
    /// Friend request received on another device
    FriendRequest = 33,
    /// Friend added
    NewFriend = 34,
    /// Friend deleted
    DeleteFriend = 35,
    /// Friend went online/offline
    FriendConnectionStatus = 36,
    /// Friend status message changed
    FriendStatus = 37,
    /// Friend name changed
    FriendName = 38,
    /// Friend chat message
    FriendChat = 39,
}

impl PacketId {
    /// Every defined tag, in wire order.
    pub const ALL: [PacketId; 8] = [
        PacketId::Alive,
        PacketId::FriendRequest,
        PacketId::NewFriend,
        PacketId::DeleteFriend,
        PacketId::FriendConnectionStatus,
        PacketId::FriendStatus,
        PacketId::FriendName,
        PacketId::FriendChat,
    ];

    /// The tag byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketId {
    type Error = SyncError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            32 => Ok(PacketId::Alive),
            33 => Ok(PacketId::FriendRequest),
            34 => Ok(PacketId::NewFriend),
            35 => Ok(PacketId::DeleteFriend),
            36 => Ok(PacketId::FriendConnectionStatus),
            37 => Ok(PacketId::FriendStatus),
            38 => Ok(PacketId::FriendName),
            39 => Ok(PacketId::FriendChat),
            _ => Err(SyncError::UnknownPacketId(value)),
        }
    }
}

/// A decoded self-sync packet, borrowing from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfPacket<'a> {
    /// Keepalive. Anything after the tag is ignored.
    Alive,
    /// A friend's name changed on the sending device.
    FriendName {
        /// Friend whose name changed.
        friend_id: FriendId,
        /// New name, opaque bytes.
        name: &'a [u8],
    },
    /// A defined tag that has no receive-side behaviour yet.
    Reserved {
        /// The tag.
        id: PacketId,
        /// Everything after the tag.
        body: &'a [u8],
    },
    /// A tag outside the defined range.
    Unknown {
        /// The raw tag byte.
        tag: u8,
    },
}

impl<'a> SelfPacket<'a> {
    /// Decode a packet.
    ///
    /// Fails on an empty buffer and on a friend-name packet too short to
    /// carry a friend identifier. Unknown tags decode to
    /// [`SelfPacket::Unknown`] rather than failing.
    pub fn decode(data: &'a [u8]) -> Result<Self, SyncError> {
        let (&tag, body) = data
            .split_first()
            .ok_or_else(|| SyncError::malformed("empty payload"))?;

        let id = match PacketId::try_from(tag) {
            Ok(id) => id,
            Err(_) => return Ok(SelfPacket::Unknown { tag }),
        };

        match id {
            PacketId::Alive => Ok(SelfPacket::Alive),
            PacketId::FriendName => {
                let (friend_id, name) = split_friend_id(body).ok_or_else(|| {
                    SyncError::malformed(format!(
                        "friend name packet needs {} bytes, got {}",
                        SYNC_HEADER_SIZE,
                        data.len()
                    ))
                })?;
                Ok(SelfPacket::FriendName { friend_id, name })
            }
            PacketId::FriendRequest
            | PacketId::NewFriend
            | PacketId::DeleteFriend
            | PacketId::FriendConnectionStatus
            | PacketId::FriendStatus
            | PacketId::FriendChat => Ok(SelfPacket::Reserved { id, body }),
        }
    }

    /// Tag byte of this packet.
    pub fn tag(&self) -> u8 {
        match self {
            SelfPacket::Alive => PacketId::Alive.as_u8(),
            SelfPacket::FriendName { .. } => PacketId::FriendName.as_u8(),
            SelfPacket::Reserved { id, .. } => id.as_u8(),
            SelfPacket::Unknown { tag } => *tag,
        }
    }
}

fn split_friend_id(body: &[u8]) -> Option<(FriendId, &[u8])> {
    if body.len() < FRIEND_ID_SIZE {
        return None;
    }
    let (id_bytes, rest) = body.split_at(FRIEND_ID_SIZE);
    let mut arr = [0u8; FRIEND_ID_SIZE];
    arr.copy_from_slice(id_bytes);
    Some((FriendId::from_le_bytes(arr), rest))
}

/// The one-byte keepalive packet.
pub fn encode_keepalive() -> [u8; 1] {
    [PacketId::Alive.as_u8()]
}

/// Build a friend-state frame: `[tag][friend id LE][payload]`.
pub fn encode_sync_frame(id: PacketId, friend_id: FriendId, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(SYNC_HEADER_SIZE + payload.len());
    frame.push(id.as_u8());
    frame.extend_from_slice(&friend_id.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_values() {
        assert_eq!(PacketId::Alive.as_u8(), 32);
        assert_eq!(PacketId::FriendName.as_u8(), 38);
        assert_eq!(PacketId::FriendChat.as_u8(), 39);
    }

    #[test]
    fn packet_id_try_from_covers_all() {
        for id in PacketId::ALL {
            assert_eq!(PacketId::try_from(id.as_u8()), Ok(id));
        }
        assert_eq!(PacketId::try_from(31), Err(SyncError::UnknownPacketId(31)));
        assert_eq!(PacketId::try_from(40), Err(SyncError::UnknownPacketId(40)));
    }

    #[test]
    fn decode_empty_fails() {
        assert!(matches!(
            SelfPacket::decode(&[]),
            Err(SyncError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn decode_keepalive_ignores_trailing_bytes() {
        assert_eq!(SelfPacket::decode(&[32]), Ok(SelfPacket::Alive));
        assert_eq!(SelfPacket::decode(&[32, 1, 2, 3]), Ok(SelfPacket::Alive));
    }

    #[test]
    fn decode_friend_name() {
        let data = [38, 42, 0, 0, 0, b'B', b'o', b'b'];
        assert_eq!(
            SelfPacket::decode(&data),
            Ok(SelfPacket::FriendName {
                friend_id: FriendId::new(42),
                name: b"Bob",
            })
        );
    }

    #[test]
    fn decode_friend_name_empty_name() {
        let data = [38, 7, 0, 0, 0];
        assert_eq!(
            SelfPacket::decode(&data),
            Ok(SelfPacket::FriendName {
                friend_id: FriendId::new(7),
                name: &[],
            })
        );
    }

    #[test]
    fn decode_short_friend_name_fails() {
        for len in 1..SYNC_HEADER_SIZE {
            let mut data = vec![38u8];
            data.resize(len, 0);
            assert!(
                matches!(
                    SelfPacket::decode(&data),
                    Err(SyncError::MalformedPacket { .. })
                ),
                "length {} should be rejected",
                len
            );
        }
    }

    #[test]
    fn decode_reserved_tags() {
        let data = [35, 1, 0, 0, 0, 9];
        assert_eq!(
            SelfPacket::decode(&data),
            Ok(SelfPacket::Reserved {
                id: PacketId::DeleteFriend,
                body: &[1, 0, 0, 0, 9],
            })
        );
        // Reserved tags carry no length requirement
        assert_eq!(
            SelfPacket::decode(&[39]),
            Ok(SelfPacket::Reserved {
                id: PacketId::FriendChat,
                body: &[],
            })
        );
    }

    #[test]
    fn decode_unknown_tag() {
        assert_eq!(
            SelfPacket::decode(&[200, 1, 2]),
            Ok(SelfPacket::Unknown { tag: 200 })
        );
    }

    #[test]
    fn tag_matches_wire_byte() {
        for data in [&[32u8][..], &[38, 0, 0, 0, 0], &[36], &[0]] {
            assert_eq!(SelfPacket::decode(data).unwrap().tag(), data[0]);
        }
    }

    #[test]
    fn sync_frame_layout() {
        let frame = encode_sync_frame(PacketId::FriendName, FriendId::new(42), b"Bob");
        assert_eq!(frame, vec![38, 42, 0, 0, 0, b'B', b'o', b'b']);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn keepalive_is_single_tag_byte() {
        assert_eq!(encode_keepalive(), [32]);
    }
}
