/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x5754 \"WT\")")]
    InvalidMagic,

    /// The body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The envelope was intact but its body is not a `(stream id, payload?)` pair.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error leaves the Channel usable.
    ///
    /// Only body-level errors are recoverable; everything else means the
    /// byte stream can no longer be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
