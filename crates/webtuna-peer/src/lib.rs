//! Channel establishment and supervision for webtuna.
//!
//! This is the "just works" layer. Peers meet through a rendezvous relay
//! under a shared key; each pairing yields one framed Channel that a
//! [`ChannelMultiplexer`](webtuna_mux::ChannelMultiplexer) then drives.
//! The connecting side keeps its Channel alive with a
//! [`ConnectionSupervisor`].

pub mod connector;
pub mod control;
pub mod error;
pub mod handshake;
pub mod key;
pub mod listener;
pub mod relay;
pub mod session;
pub mod supervisor;

pub use connector::{attach, connect, connect_with_config, Channel};
pub use control::{RelayMessage, Role};
pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, read_hello, validate_key, HandshakeConfig, Hello, MAX_KEY_LEN,
    PROTOCOL_NAME, PROTOCOL_VERSION,
};
pub use key::{generate_key, KEY_LENGTH};
pub use listener::ShareListener;
pub use relay::{RelayConfig, RelayServer, DEFAULT_RELAY_ADDR};
pub use session::{run_connect, run_connect_session, serve_share, ConnectOptions};
pub use supervisor::{
    ConnectionSupervisor, CycleOutcome, SupervisorConfig, SupervisorState, RETRY_DELAY,
};
