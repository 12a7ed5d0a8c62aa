/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The Channel failed; every stream on it has been torn down.
    #[error("channel error: {0}")]
    Channel(#[from] webtuna_frame::FrameError),

    /// The multiplexer has already finished.
    #[error("multiplexer closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, MuxError>;
