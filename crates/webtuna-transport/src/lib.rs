//! TCP transport primitives for webtuna.
//!
//! Provides the local TCP edges of the tunnel:
//! - a bound listener that accepts local client connections
//! - a dialer that connects to the local service being shared
//!
//! This is the lowest layer of webtuna. Everything else builds on top of
//! the [`LocalStream`] bound exported here.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{dial, TcpTransport};
pub use traits::LocalStream;
