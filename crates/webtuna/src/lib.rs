//! Point-to-point TCP tunnel with stream multiplexing.
//!
//! webtuna exposes a TCP port on one host at a port on another. Every TCP
//! connection accepted on the receiving side becomes one logical stream
//! over a single Channel between the two peers.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listener and dialer primitives
//! - [`frame`]: wire envelope codec and the `Frame` type
//! - [`mux`]: stream ids, the stream table and the Channel multiplexer
//! - [`peer`]: relay rendezvous, session keys and connection supervision

/// Re-export transport types.
pub mod transport {
    pub use webtuna_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use webtuna_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use webtuna_mux::*;
}

/// Re-export peer types.
pub mod peer {
    pub use webtuna_peer::*;
}
