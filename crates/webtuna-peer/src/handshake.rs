use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing::debug;
use webtuna_frame::{FrameError, TunaCodec};
use webtuna_transport::LocalStream;

use crate::control::{RelayMessage, Role};
use crate::error::{PeerError, Result};

/// Protocol name announced in every `hello`.
pub const PROTOCOL_NAME: &str = "webtuna";
/// Protocol version announced in every `hello`.
pub const PROTOCOL_VERSION: &str = "1.0";
/// Longest accepted rendezvous key.
pub const MAX_KEY_LEN: usize = 128;

/// Configuration for the relay exchange.
#[derive(Clone)]
pub struct HandshakeConfig {
    /// Timeout for each handshake step.
    pub timeout: Duration,
    /// How long a connecting peer waits for the sharing peer to attach.
    /// Must exceed the relay's attach timeout.
    pub pairing_timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum CONTROL frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            pairing_timeout: Duration::from_secs(20),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("timeout", &self.timeout)
            .field("pairing_timeout", &self.pairing_timeout)
            .field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("max_handshake_payload", &self.max_handshake_payload)
            .finish()
    }
}

/// A validated `hello` as seen by the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct Hello {
    pub role: Role,
    pub key: String,
    pub ticket: Option<u64>,
}

// Anyone holding the key can reach the shared port.
impl fmt::Debug for Hello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hello")
            .field("role", &self.role)
            .field("key", &format_args!("<redacted:{} bytes>", self.key.len()))
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Check that `key` is 1..=128 characters of `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "key length must be 1..={MAX_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(PeerError::HandshakeFailed(
            "key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Send one CONTROL message, bounded by the handshake timeout.
pub(crate) async fn send_message<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
    msg: &RelayMessage,
    config: &HandshakeConfig,
) -> Result<()> {
    let frame = msg.to_frame()?;
    tokio::time::timeout(config.timeout, framed.send(frame))
        .await
        .map_err(|_| PeerError::Timeout(config.timeout))??;
    Ok(())
}

/// Wait for the next CONTROL message with no deadline.
pub(crate) async fn next_message<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
) -> Result<RelayMessage> {
    match framed.next().await {
        Some(Ok(envelope)) => RelayMessage::from_envelope(&envelope),
        Some(Err(FrameError::ConnectionClosed)) | None => Err(PeerError::Disconnected(
            "connection closed during relay exchange".to_string(),
        )),
        Some(Err(err)) => Err(err.into()),
    }
}

/// Wait for the next CONTROL message, up to `limit`.
pub(crate) async fn recv_message<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
    limit: Duration,
) -> Result<RelayMessage> {
    tokio::time::timeout(limit, next_message(framed))
        .await
        .map_err(|_| PeerError::Timeout(limit))?
}

/// Tell the other side why it is being turned away. Best effort.
pub(crate) async fn reject<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
    reason: &str,
    config: &HandshakeConfig,
) {
    if let Err(err) = send_message(framed, &RelayMessage::rejected(reason), config).await {
        debug!(error = %err, "could not deliver rejection");
    }
}

/// Client side: announce `role` under `key` and wait for `welcome`.
///
/// Returns the session label assigned by the relay. A `connect` hello
/// waits up to `pairing_timeout`, since the relay answers only once the
/// sharing peer has attached.
pub async fn handshake_client<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
    role: Role,
    key: &str,
    ticket: Option<u64>,
    config: &HandshakeConfig,
) -> Result<String> {
    validate_key(key)?;
    framed
        .codec_mut()
        .set_max_payload_size(config.max_handshake_payload);

    let hello = RelayMessage::Hello {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        role,
        key: key.to_string(),
        ticket,
    };
    send_message(framed, &hello, config).await?;

    let limit = match role {
        Role::Connect => config.pairing_timeout,
        Role::Share | Role::Attach => config.timeout,
    };
    match recv_message(framed, limit).await? {
        RelayMessage::Welcome { session } => Ok(session),
        RelayMessage::Rejected { reason } => Err(PeerError::Rejected(reason)),
        other => Err(PeerError::HandshakeFailed(format!(
            "expected welcome, got {}",
            other.kind()
        ))),
    }
}

/// Relay side: read and validate the opening `hello`.
///
/// On a protocol, version or key mismatch the peer is sent a `rejected`
/// before the error is returned.
pub async fn read_hello<T: LocalStream>(
    framed: &mut Framed<T, TunaCodec>,
    config: &HandshakeConfig,
) -> Result<Hello> {
    framed
        .codec_mut()
        .set_max_payload_size(config.max_handshake_payload);

    let (protocol, version, role, key, ticket) = match recv_message(framed, config.timeout).await? {
        RelayMessage::Hello {
            protocol,
            version,
            role,
            key,
            ticket,
        } => (protocol, version, role, key, ticket),
        other => {
            let reason = format!("expected hello, got {}", other.kind());
            reject(framed, &reason, config).await;
            return Err(PeerError::HandshakeFailed(reason));
        }
    };

    let failure = if protocol != config.protocol_name {
        Some(format!(
            "unknown protocol '{protocol}' (expected '{}')",
            config.protocol_name
        ))
    } else if !is_version_compatible(&version, &config.protocol_version) {
        Some(format!(
            "incompatible version '{version}' (relay '{}')",
            config.protocol_version
        ))
    } else {
        validate_key(&key).err().map(|err| err.to_string())
    };
    if let Some(reason) = failure {
        reject(framed, &reason, config).await;
        return Err(PeerError::HandshakeFailed(reason));
    }

    Ok(Hello { role, key, ticket })
}

/// Versions are compatible when their major components match.
fn is_version_compatible(left: &str, right: &str) -> bool {
    let major = |v: &str| v.split('.').next().and_then(|m| m.parse::<u32>().ok());
    matches!((major(left), major(right)), (Some(l), Some(r)) if l == r)
}
