//! Gateway operation codes.
//!
//! Opcodes tag the kind of payload being sent or received over the
//! websocket (§3, §6). Only the codes this spec's [`Payload`](crate::payload::Payload)
//! variant actually uses are represented; unknown incoming ops are handled
//! by the codec (§7 item 7), not by this enum, since a closed
//! `Deserialize` derive would turn an unknown op into a hard decode error
//! instead of a logged-and-ignored one.

use serde_repr::Serialize_repr;

/// Gateway operation codes used by outgoing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// Dispatch — an event was delivered. Receive only.
    Dispatch = 0,
    /// Heartbeat — keep the connection alive. Send and receive.
    Heartbeat = 1,
    /// Identify — start a new session. Send only.
    Identify = 2,
    /// Resume — resume a previous session. Send only.
    Resume = 6,
    /// Reconnect — server requests a reconnect. Receive only.
    Reconnect = 7,
    /// Invalid Session — the session has been invalidated. Receive only.
    InvalidSession = 9,
    /// Hello — sent immediately after connecting. Receive only.
    Hello = 10,
    /// Heartbeat ACK — acknowledgment of a heartbeat. Receive only.
    HeartbeatAck = 11,
}

/// The raw op codes this crate recognizes on the receive side. Anything
/// else is an unknown op and is handled by the caller (logged at `warn`,
/// message discarded) rather than by this type.
pub const KNOWN_RECEIVE_OPS: &[u8] = &[0, 1, 7, 9, 10, 11];
