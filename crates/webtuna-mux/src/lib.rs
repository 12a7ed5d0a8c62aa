//! Stream multiplexing over one ordered message Channel.
//!
//! This is the core of webtuna. A [`ChannelMultiplexer`] owns one Channel
//! and one [`StreamTable`], relays bytes between local sockets and
//! [`Frame`](webtuna_frame::Frame)s, and tears every stream down when the
//! Channel ends. All state for one Channel is confined to the
//! multiplexer's task; local sockets and dial attempts talk to it through
//! a single event queue.

pub mod dialer;
pub mod error;
pub mod id;
pub mod multiplexer;
mod pump;
pub mod table;

pub use dialer::{DialFuture, Dialer, TcpDialer};
pub use error::{MuxError, Result};
pub use id::IdAllocator;
pub use multiplexer::{ChannelMultiplexer, MuxHandle};
pub use table::{AttemptId, Entry, Resolution, StreamHandle, StreamTable};
