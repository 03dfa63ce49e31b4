//! # sync-core
//!
//! Pure logic for selfsync (no I/O, instant tests).
//!
//! This crate implements the self-connection table, the per-slot link state
//! machine and liveness planning without touching any transport, enabling
//! fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time) and produce output without side effects:
//! - The [`SlotTable`] mutates only its own memory
//! - [`LivenessPolicy::plan`] returns [`LivenessAction`]s instead of sending
//! - Time is always passed in as whole seconds, never read from a clock
//!
//! The actual I/O is performed by `sync-manager`, which interprets the
//! actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod liveness;
pub mod state;
pub mod table;

pub use liveness::{
    LivenessAction, LivenessPolicy, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS,
};
pub use state::{LinkEvent, SlotStatus, StatusAction};
pub use table::{SelfConnection, SlotKey, SlotSnapshot, SlotTable, DEFAULT_CAPACITY};
