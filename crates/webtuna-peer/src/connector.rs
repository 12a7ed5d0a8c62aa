use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};
use webtuna_frame::{TunaCodec, DEFAULT_MAX_PAYLOAD};

use crate::control::Role;
use crate::error::{PeerError, Result};
use crate::handshake::{handshake_client, validate_key, HandshakeConfig};

/// A framed, relay-paired connection between the two peers.
pub type Channel = Framed<TcpStream, TunaCodec>;

/// Reach the peer sharing `key` through the relay at `relay`.
pub async fn connect(relay: &str, key: &str) -> Result<Channel> {
    connect_with_config(relay, key, &HandshakeConfig::default()).await
}

/// Reach the peer sharing `key` using explicit configuration.
pub async fn connect_with_config(
    relay: &str,
    key: &str,
    config: &HandshakeConfig,
) -> Result<Channel> {
    let (channel, session) = open(relay, Role::Connect, key, None, config).await?;
    info!(relay, session = %session, "channel established");
    Ok(channel)
}

/// Answer the relay's `incoming` notice identified by `ticket`.
pub async fn attach(relay: &str, key: &str, ticket: u64, config: &HandshakeConfig) -> Result<Channel> {
    let (channel, session) = open(relay, Role::Attach, key, Some(ticket), config).await?;
    debug!(relay, ticket, session = %session, "attached to relay");
    Ok(channel)
}

/// Dial the relay and complete the `hello`/`welcome` exchange.
pub(crate) async fn open(
    relay: &str,
    role: Role,
    key: &str,
    ticket: Option<u64>,
    config: &HandshakeConfig,
) -> Result<(Channel, String)> {
    validate_key(key)?;

    let stream = tokio::time::timeout(config.timeout, webtuna_transport::dial(relay))
        .await
        .map_err(|_| PeerError::Timeout(config.timeout))??;
    let mut channel = Framed::new(stream, TunaCodec::default());

    let session = handshake_client(&mut channel, role, key, ticket, config).await?;
    channel.codec_mut().set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    Ok((channel, session))
}
