//! Rendezvous relay.
//!
//! Peers never learn each other's address. The sharing peer keeps a
//! control connection registered under its key; a connecting peer names
//! the key, the relay sends the sharer an `incoming` notice with a
//! ticket, and the sharer opens a fresh connection that attaches to it.
//! The two connections are then spliced byte for byte, so the Channel
//! runs end to end between the peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use webtuna_frame::TunaCodec;
use webtuna_transport::TcpTransport;

use crate::connector::Channel;
use crate::control::{RelayMessage, Role};
use crate::error::{PeerError, Result};
use crate::handshake::{read_hello, reject, send_message, HandshakeConfig, Hello};

/// Address the relay listens on unless told otherwise.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:9009";

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub handshake: HandshakeConfig,
    /// How long a connecting peer may wait for the sharer to attach.
    pub attach_timeout: Duration,
    /// Interval between pings on idle share registrations.
    pub keepalive_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            attach_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

struct Registration {
    id: u64,
    notices: mpsc::UnboundedSender<RelayMessage>,
}

struct PendingConnect {
    key: String,
    attach: oneshot::Sender<Channel>,
}

#[derive(Default)]
struct RelayState {
    shares: HashMap<String, Registration>,
    pending: HashMap<u64, PendingConnect>,
    next_registration: u64,
    next_ticket: u64,
}

#[derive(Clone, Default)]
struct SharedState(Arc<Mutex<RelayState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        // State stays consistent across a panicking holder; every update
        // is a single map operation.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The rendezvous relay server.
pub struct RelayServer {
    transport: TcpTransport,
    state: SharedState,
    config: RelayConfig,
}

impl RelayServer {
    /// Bind the relay to `addr`.
    pub async fn bind(addr: &str, config: RelayConfig) -> Result<Self> {
        let transport = TcpTransport::bind(addr).await?;
        Ok(Self {
            transport,
            state: SharedState::default(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Number of keys currently registered.
    pub fn registered_keys(&self) -> usize {
        self.state.lock().shares.len()
    }

    /// Accept and serve peers until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr(), "relay ready");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("relay shutting down");
                    return Ok(());
                }
                accepted = self.transport.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        let config = self.config.clone();
                        let span = tracing::debug_span!("peer", %peer);
                        tokio::spawn(handle_connection(stream, state, config).instrument(span));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: SharedState, config: RelayConfig) {
    let mut channel = Framed::new(stream, TunaCodec::default());
    let Hello { role, key, ticket } = match read_hello(&mut channel, &config.handshake).await {
        Ok(hello) => hello,
        Err(err) => {
            debug!(error = %err, "handshake failed");
            return;
        }
    };

    let outcome = match role {
        Role::Share => serve_share(channel, key, &state, &config).await,
        Role::Connect => serve_connect(channel, key, &state, &config).await,
        Role::Attach => serve_attach(channel, key, ticket, &state, &config).await,
    };
    if let Err(err) = outcome {
        debug!(?role, error = %err, "peer finished with error");
    }
}

async fn serve_share(
    mut channel: Channel,
    key: String,
    state: &SharedState,
    config: &RelayConfig,
) -> Result<()> {
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let registration = {
        let mut state = state.lock();
        if state.shares.contains_key(&key) {
            None
        } else {
            state.next_registration += 1;
            let id = state.next_registration;
            state.shares.insert(
                key.clone(),
                Registration {
                    id,
                    notices: notices_tx,
                },
            );
            Some(id)
        }
    };
    let Some(registration) = registration else {
        reject(&mut channel, "key already in use", &config.handshake).await;
        return Err(PeerError::Rejected("key already in use".to_string()));
    };

    let result = share_loop(&mut channel, registration, notices_rx, config).await;

    let mut guard = state.lock();
    if guard
        .shares
        .get(&key)
        .is_some_and(|current| current.id == registration)
    {
        guard.shares.remove(&key);
    }
    drop(guard);
    info!(registration, "share unregistered");
    result
}

async fn share_loop(
    channel: &mut Channel,
    registration: u64,
    mut notices: mpsc::UnboundedReceiver<RelayMessage>,
    config: &RelayConfig,
) -> Result<()> {
    let welcome = RelayMessage::Welcome {
        session: format!("share-{registration}"),
    };
    send_message(channel, &welcome, &config.handshake).await?;
    info!(registration, "share registered");

    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.tick().await;
    loop {
        tokio::select! {
            Some(notice) = notices.recv() => {
                send_message(channel, &notice, &config.handshake).await?;
            }
            _ = keepalive.tick() => {
                send_message(channel, &RelayMessage::Ping, &config.handshake).await?;
            }
            inbound = channel.next() => match inbound {
                None => return Ok(()),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn serve_connect(
    mut channel: Channel,
    key: String,
    state: &SharedState,
    config: &RelayConfig,
) -> Result<()> {
    let (attach_tx, attach_rx) = oneshot::channel();
    let ticket = {
        let mut state = state.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let notified = state
            .shares
            .get(&key)
            .is_some_and(|share| share.notices.send(RelayMessage::Incoming { ticket }).is_ok());
        if notified {
            state.pending.insert(
                ticket,
                PendingConnect {
                    key,
                    attach: attach_tx,
                },
            );
            Some(ticket)
        } else {
            None
        }
    };
    let Some(ticket) = ticket else {
        reject(&mut channel, "no peer is sharing this key", &config.handshake).await;
        return Err(PeerError::Rejected("no peer is sharing this key".to_string()));
    };
    debug!(ticket, "waiting for sharing peer to attach");

    let attached = match tokio::time::timeout(config.attach_timeout, attach_rx).await {
        Ok(Ok(attached)) => attached,
        _ => {
            state.lock().pending.remove(&ticket);
            reject(&mut channel, "sharing peer did not answer", &config.handshake).await;
            return Err(PeerError::Timeout(config.attach_timeout));
        }
    };

    let mut attached = attached;
    let welcome = RelayMessage::Welcome {
        session: format!("pair-{ticket}"),
    };
    send_message(&mut attached, &welcome, &config.handshake).await?;
    send_message(&mut channel, &welcome, &config.handshake).await?;
    info!(ticket, "peers paired");

    let (to_share, to_connect) = splice(channel, attached).await?;
    info!(ticket, to_share, to_connect, "pair closed");
    Ok(())
}

async fn serve_attach(
    mut channel: Channel,
    key: String,
    ticket: Option<u64>,
    state: &SharedState,
    config: &RelayConfig,
) -> Result<()> {
    let pending = ticket.and_then(|ticket| {
        let mut state = state.lock();
        let owned = state
            .pending
            .get(&ticket)
            .is_some_and(|pending| pending.key == key);
        if owned {
            state.pending.remove(&ticket)
        } else {
            None
        }
    });
    let Some(pending) = pending else {
        reject(&mut channel, "unknown ticket", &config.handshake).await;
        return Err(PeerError::Rejected("unknown ticket".to_string()));
    };

    // The connecting side owns the pair from here on.
    if let Err(mut channel) = pending.attach.send(channel) {
        reject(&mut channel, "connecting peer went away", &config.handshake).await;
        return Err(PeerError::Disconnected("connecting peer went away".to_string()));
    }
    Ok(())
}

/// Copy bytes both ways until each side has finished. Bytes the codec
/// already buffered are forwarded first.
async fn splice(a: Channel, b: Channel) -> Result<(u64, u64)> {
    let a = a.into_parts();
    let b = b.into_parts();
    let (mut a_io, mut b_io) = (a.io, b.io);
    if !a.read_buf.is_empty() {
        b_io.write_all(&a.read_buf).await?;
    }
    if !b.read_buf.is_empty() {
        a_io.write_all(&b.read_buf).await?;
    }
    Ok(tokio::io::copy_bidirectional(&mut a_io, &mut b_io).await?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::SinkExt;
    use webtuna_frame::Frame;

    use super::*;
    use crate::connector::{attach, connect};
    use crate::listener::ShareListener;

    async fn start_relay(config: RelayConfig) -> (String, CancellationToken) {
        let relay = RelayServer::bind("127.0.0.1:0", config).await.unwrap();
        let addr = relay.local_addr().to_string();
        let token = CancellationToken::new();
        tokio::spawn(relay.run(token.clone()));
        (addr, token)
    }

    #[tokio::test]
    async fn pairs_share_and_connect() {
        let (relay, _token) = start_relay(RelayConfig::default()).await;
        let mut listener = ShareListener::register(&relay, "pair-key").await.unwrap();

        let sharer = tokio::spawn(async move { listener.accept().await.unwrap() });
        let mut connector = connect(&relay, "pair-key").await.unwrap();
        let mut shared = sharer.await.unwrap();

        connector.send(Frame::data(1, &b"ping"[..])).await.unwrap();
        let envelope = shared.next().await.unwrap().unwrap();
        assert_eq!(envelope.frame().unwrap(), Frame::data(1, &b"ping"[..]));

        shared.send(Frame::close(1)).await.unwrap();
        let envelope = connector.next().await.unwrap().unwrap();
        assert_eq!(envelope.frame().unwrap(), Frame::close(1));

        // Closing one end closes the other.
        drop(shared);
        assert!(connector.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let (relay, _token) = start_relay(RelayConfig::default()).await;
        let err = connect(&relay, "nobody").await.unwrap_err();
        assert!(matches!(err, PeerError::Rejected(ref reason) if reason.contains("no peer")));
    }

    #[tokio::test]
    async fn duplicate_share_is_rejected() {
        let (relay, _token) = start_relay(RelayConfig::default()).await;
        let _first = ShareListener::register(&relay, "dup").await.unwrap();
        let err = ShareListener::register(&relay, "dup").await.unwrap_err();
        assert!(matches!(err, PeerError::Rejected(ref reason) if reason.contains("in use")));
    }

    #[tokio::test]
    async fn key_is_released_when_sharer_leaves() {
        let (relay, _token) = start_relay(RelayConfig::default()).await;
        let first = ShareListener::register(&relay, "again").await.unwrap();
        drop(first);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match ShareListener::register(&relay, "again").await {
                Ok(_) => break,
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(err) => panic!("key never released: {err}"),
            }
        }
    }

    #[tokio::test]
    async fn attach_with_unknown_ticket_is_rejected() {
        let (relay, _token) = start_relay(RelayConfig::default()).await;
        let err = attach(&relay, "k", 99, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Rejected(ref reason) if reason.contains("ticket")));
    }

    #[tokio::test]
    async fn silent_sharer_times_out_connect() {
        let config = RelayConfig {
            attach_timeout: Duration::from_millis(200),
            ..RelayConfig::default()
        };
        let (relay, _token) = start_relay(config).await;

        // Registered, but never calls accept().
        let _listener = ShareListener::register(&relay, "quiet").await.unwrap();
        let err = connect(&relay, "quiet").await.unwrap_err();
        assert!(matches!(err, PeerError::Rejected(ref reason) if reason.contains("did not answer")));
    }

    #[tokio::test]
    async fn keepalive_pings_are_answered() {
        let config = RelayConfig {
            keepalive_interval: Duration::from_millis(50),
            ..RelayConfig::default()
        };
        let (relay, _token) = start_relay(config).await;
        let mut listener = ShareListener::register(&relay, "alive").await.unwrap();

        let sharer = tokio::spawn(async move { listener.accept().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Registration survived several ping rounds.
        let _connector = connect(&relay, "alive").await.unwrap();
        let _shared = sharer.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let relay = RelayServer::bind("127.0.0.1:0", RelayConfig::default())
            .await
            .unwrap();
        assert_eq!(relay.registered_keys(), 0);
        let token = CancellationToken::new();
        let task = tokio::spawn(relay.run(token.clone()));
        token.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
