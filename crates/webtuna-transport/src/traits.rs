use tokio::io::{AsyncRead, AsyncWrite};

/// A connected local byte stream that can back one tunneled stream.
///
/// On the real tunnel this is a [`tokio::net::TcpStream`]; tests use
/// in-memory pipes such as [`tokio::io::DuplexStream`].
pub trait LocalStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> LocalStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
