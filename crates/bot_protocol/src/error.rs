//! Error types for framing and payload interpretation.

use std::io;
use std::time::Duration;

/// Errors raised while reading or writing a single frame.
///
/// Every variant leaves the stream in an unknown position, so callers treat
/// any `FrameError` as connection-fatal. There is no frame-level resync.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Declared length was zero or above [`crate::MAX_FRAME_SIZE`].
    #[error("invalid frame length {0}")]
    InvalidLength(u64),

    /// The peer closed the socket part way through a frame.
    #[error("connection closed mid-frame after {received} of {expected} bytes")]
    PrematureClose { expected: usize, received: usize },

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The writer was closed while the frame was waiting or in flight.
    #[error("writer closed")]
    Closed,

    /// The peer stopped draining the socket for longer than the write timeout.
    #[error("write stalled for {0:?}")]
    WriteTimeout(Duration),
}

/// Errors raised while turning a frame payload into something meaningful.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("command serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("text frame is not valid UTF-8: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("malformed control message: {0:?}")]
    MalformedControl(String),
}
