use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// TCP listener transport.
///
/// Binds a local port and hands out accepted connections with Nagle's
/// algorithm disabled, since tunneled traffic is already chunked by the
/// remote side.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr`.
    pub async fn bind<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Debug,
    {
        let label = format!("{addr:?}");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: label.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: label,
                source,
            })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Bind on all interfaces at `port`.
    pub async fn bind_port(port: u16) -> Result<Self> {
        Self::bind(("0.0.0.0", port)).await
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok((stream, peer))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect to a listening TCP endpoint.
pub async fn dial<A>(addr: A) -> Result<TcpStream>
where
    A: ToSocketAddrs + std::fmt::Debug,
{
    let label = format!("{addr:?}");
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: label.clone(),
            source,
        })?;
    stream.set_nodelay(true)?;
    debug!(addr = %label, "connected over tcp");
    Ok(stream)
}
