use std::future::Future;
use std::io;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tracing::debug;
use webtuna_frame::StreamId;

/// Future returned by a [`Dialer`].
pub type DialFuture<S> = BoxFuture<'static, io::Result<S>>;

/// Opens the local socket backing a stream first seen on the Channel.
///
/// Only the exposing side has a dialer. Any
/// `Fn(StreamId) -> impl Future<Output = io::Result<S>>` closure is one.
pub trait Dialer<S>: Send + Sync + 'static {
    fn dial(&self, id: StreamId) -> DialFuture<S>;
}

impl<S, F, Fut> Dialer<S> for F
where
    F: Fn(StreamId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<S>> + Send + 'static,
{
    fn dial(&self, id: StreamId) -> DialFuture<S> {
        Box::pin(self(id))
    }
}

/// Dials a fixed local TCP address for every new stream.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Dial `127.0.0.1:<port>`.
    pub fn localhost(port: u16) -> Self {
        Self::new(format!("127.0.0.1:{port}"))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Dialer<TcpStream> for TcpDialer {
    fn dial(&self, id: StreamId) -> DialFuture<TcpStream> {
        let addr = self.addr.clone();
        Box::pin(async move {
            debug!(stream_id = id, %addr, "new incoming connection");
            let stream = webtuna_transport::dial(addr.as_str()).await?;
            Ok(stream)
        })
    }
}
