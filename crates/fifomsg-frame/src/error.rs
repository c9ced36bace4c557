/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body does not fit in one atomic pipe write.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer declared a negative body length.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The channel ended part-way through a frame.
    #[error("truncated frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// A whole message carried more or fewer bytes than its header declared.
    #[error("frame length mismatch (declared {declared}, received {received})")]
    LengthMismatch { declared: usize, received: usize },

    /// The channel ended cleanly at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// Waiting for the rest of a frame failed.
    #[error("frame wait failed: {0}")]
    Wait(#[from] fifomsg_transport::TransportError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
