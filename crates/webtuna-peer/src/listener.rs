use std::fmt;

use tracing::{debug, info, warn};

use crate::connector::{attach, open, Channel};
use crate::control::{RelayMessage, Role};
use crate::error::Result;
use crate::handshake::{next_message, send_message, HandshakeConfig};

/// A key registered with the relay by the sharing peer.
///
/// The registration lives as long as the control connection. Each
/// connecting peer is announced with an `incoming` notice, answered by
/// opening a fresh Channel with [`attach`].
pub struct ShareListener {
    relay: String,
    key: String,
    session: String,
    control: Channel,
    config: HandshakeConfig,
}

impl ShareListener {
    /// Register `key` with the relay at `relay`.
    pub async fn register(relay: &str, key: &str) -> Result<Self> {
        Self::register_with_config(relay, key, HandshakeConfig::default()).await
    }

    /// Register `key` using explicit configuration.
    pub async fn register_with_config(
        relay: &str,
        key: &str,
        config: HandshakeConfig,
    ) -> Result<Self> {
        let (control, session) = open(relay, Role::Share, key, None, &config).await?;
        info!(relay, "registered with relay");
        Ok(Self {
            relay: relay.to_string(),
            key: key.to_string(),
            session,
            control,
            config,
        })
    }

    /// Wait for the next connecting peer and return its Channel.
    ///
    /// Keepalive pings are answered while waiting. A failed attach is
    /// logged and skipped; only losing the registration is an error.
    pub async fn accept(&mut self) -> Result<Channel> {
        loop {
            match next_message(&mut self.control).await? {
                RelayMessage::Incoming { ticket } => {
                    debug!(ticket, "peer requested a channel");
                    match attach(&self.relay, &self.key, ticket, &self.config).await {
                        Ok(channel) => return Ok(channel),
                        Err(err) => warn!(ticket, error = %err, "failed to attach channel"),
                    }
                }
                RelayMessage::Ping => {
                    send_message(&mut self.control, &RelayMessage::Pong, &self.config).await?;
                }
                other => debug!(kind = other.kind(), "ignoring relay message"),
            }
        }
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Session label the relay assigned to this registration.
    pub fn session(&self) -> &str {
        &self.session
    }
}

impl fmt::Debug for ShareListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareListener")
            .field("relay", &self.relay)
            .field("key", &format_args!("<redacted:{} bytes>", self.key.len()))
            .field("session", &self.session)
            .finish()
    }
}
