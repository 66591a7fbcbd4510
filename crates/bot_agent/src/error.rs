use bot_protocol::{FrameError, ProtocolError};
use std::io;

/// Any condition that ends an agent session.
///
/// The lifecycle treats every variant the same way: tear down the current
/// session and let the supervisor reconnect. Only [`Cancelled`](Self::Cancelled)
/// stops the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionFailure {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("handshake write failed: {0}")]
    Handshake(#[source] FrameError),

    #[error("keepalive write failed: {0}")]
    Keepalive(#[source] FrameError),

    #[error("acknowledgment write failed: {0}")]
    Acknowledge(#[source] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("shutdown requested")]
    Cancelled,
}
