//! Length-prefixed envelope framing with stream-id multiplexing.
//!
//! Every message on a webtuna Channel is framed with:
//! - A 2-byte magic number ("WT") for stream synchronization
//! - A 4-byte little-endian body length
//! - A body carrying one [`Frame`]: a kind byte, a 4-byte little-endian
//!   stream id and the payload
//!
//! Envelope errors desynchronize the Channel and are fatal to it. Body
//! errors are contained to the one frame and surface as
//! [`FrameError::Malformed`].

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::{
    decode_envelope, encode_frame, Envelope, Frame, FrameConfig, TunaCodec, BODY_HEADER_SIZE,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, KIND_DATA, KIND_END, MAGIC,
};
pub use error::{FrameError, Result};
pub use stream::{is_control, stream_name, StreamId, CONTROL, FIRST_STREAM_ID};
