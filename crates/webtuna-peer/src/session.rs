//! Share and connect session runners.

use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use webtuna_frame::TunaCodec;
use webtuna_mux::{ChannelMultiplexer, IdAllocator, MuxHandle, TcpDialer};
use webtuna_transport::{LocalStream, TcpTransport};

use crate::connector::{connect_with_config, Channel};
use crate::error::Result;
use crate::handshake::HandshakeConfig;
use crate::listener::ShareListener;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};

/// Exposing side: serve every Channel the relay pairs with `listener`.
///
/// Each Channel gets its own multiplexer dialing `127.0.0.1:<source_port>`
/// for new stream ids. Returns `Ok(())` when `shutdown` fires and an
/// error when the relay registration is lost.
pub async fn serve_share(
    mut listener: ShareListener,
    source_port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let channel = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let dialer = TcpDialer::localhost(source_port);
        info!(forward_to = dialer.addr(), "connection opened");

        let (mux, _handle) = ChannelMultiplexer::<_, TcpStream>::with_dialer(channel, dialer);
        tokio::spawn(
            async move {
                match mux.run().await {
                    Ok(()) => info!("connection closed"),
                    Err(err) => warn!(error = %err, "connection closed with error"),
                }
            }
            .in_current_span(),
        );
    }
}

/// Receiving side: forward every socket accepted on `listener` over
/// `channel` until the Channel ends.
///
/// Stream ids start over at 1 for every session. The listener is dropped
/// when this returns, so the port is released between sessions.
pub async fn run_connect_session<C: LocalStream>(
    channel: Framed<C, TunaCodec>,
    listener: TcpTransport,
) -> Result<()> {
    let (mux, handle) = ChannelMultiplexer::<C, TcpStream>::new(channel);
    let result = tokio::select! {
        result = mux.run() => result.map_err(Into::into),
        () = accept_streams(&listener, handle) => Ok(()),
    };
    info!(port = listener.local_addr().port(), "closing local server");
    result
}

async fn accept_streams(listener: &TcpTransport, handle: MuxHandle<TcpStream>) {
    let mut ids = IdAllocator::new();
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let id = ids.allocate();
                debug!(stream_id = id, %peer, "new incoming connection");
                if handle.register_socket(id, socket).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

const ACCEPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

/// Parameters for the receiving side.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub relay: String,
    pub key: String,
    /// Port the local listener binds on every session.
    pub local_port: u16,
    pub handshake: HandshakeConfig,
    pub supervisor: SupervisorConfig,
}

/// Receiving side: keep a Channel to the sharing peer open and forward
/// `local_port` over it, reconnecting until `shutdown` fires.
pub async fn run_connect(options: ConnectOptions, shutdown: CancellationToken) {
    let ConnectOptions {
        relay,
        key,
        local_port,
        handshake,
        supervisor,
    } = options;

    let establish = move || {
        let relay = relay.clone();
        let key = key.clone();
        let handshake = handshake.clone();
        async move { connect_with_config(&relay, &key, &handshake).await }
    };
    let serve = move |channel: Channel| async move {
        let listener = match TcpTransport::bind_port(local_port).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(port = local_port, error = %err, "failed to bind local port");
                return;
            }
        };
        if let Err(err) = run_connect_session(channel, listener).await {
            warn!(error = %err, "connection error");
        }
    };

    ConnectionSupervisor::with_config(establish, serve, supervisor)
        .run(shutdown)
        .await;
}
