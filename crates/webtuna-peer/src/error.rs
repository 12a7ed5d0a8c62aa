/// Errors that can occur while establishing or serving a Channel.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] webtuna_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] webtuna_frame::FrameError),

    /// Multiplexer error.
    #[error("multiplexer error: {0}")]
    Mux(#[from] webtuna_mux::MuxError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The relay (or the peer behind it) refused the request.
    #[error("rejected by relay: {0}")]
    Rejected(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error while relaying bytes.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
