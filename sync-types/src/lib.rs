//! # sync-types
//!
//! Identity types and wire format for selfsync.
//!
//! selfsync keeps encrypted links between devices that share one identity
//! key and propagates friend-state changes between them. This crate holds the
//! pieces every other selfsync crate agrees on:
//! - [`PublicKey`], [`FriendId`], [`ConnectionId`] - identity and handle types
//! - [`PacketId`], [`SelfPacket`] - the self-sync packet tags and decoder
//! - [`SyncError`] - error kinds

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod packet;

pub use error::SyncError;
pub use ids::{ConnectionId, FriendId, PublicKey, PUBLIC_KEY_SIZE};
pub use packet::{
    encode_keepalive, encode_sync_frame, PacketId, SelfPacket, FRIEND_ID_SIZE, SYNC_HEADER_SIZE,
};
