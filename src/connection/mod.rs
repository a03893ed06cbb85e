//! WebSocket connection management.
//!
//! This module contains:
//! - [`websocket`]: Low-level helpers (realtime URL derivation, handshake
//!   URL assembly, subprotocol request construction, frame send/parse)
//! - [`shared`]: The shared multiplexed connection actor that owns the
//!   socket, the subscription table, and every provider timer

pub(crate) mod shared;
pub(crate) mod websocket;

pub(crate) use shared::{ConnCmd, SharedConnection};

/// Capacity for per-subscription event channels.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity for the actor command mailbox.
pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Maximum accepted text frame size (16 MiB).
pub(crate) const MAX_WS_TEXT_MESSAGE_BYTES: usize = 16 << 20;
