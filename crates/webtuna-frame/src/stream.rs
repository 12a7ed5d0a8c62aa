//! Stream identifiers.
//!
//! Id 0 is reserved for relay control traffic during Channel
//! establishment. Tunneled streams are numbered from 1.

/// Identifier of one multiplexed stream, scoped to one Channel.
pub type StreamId = u32;

/// Relay handshake and keepalive messages.
pub const CONTROL: StreamId = 0;

/// First id handed out for a tunneled stream.
pub const FIRST_STREAM_ID: StreamId = 1;

/// Returns a human-readable name for a stream id.
pub fn stream_name(id: StreamId) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        _ => "STREAM",
    }
}

/// Returns true if the id is reserved for control traffic.
pub fn is_control(id: StreamId) -> bool {
    id == CONTROL
}
