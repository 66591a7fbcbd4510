//! Typed notifications an agent hands to its business-level consumer.

use crate::error::ConnectionFailure;
use bot_protocol::{Command, SessionId};
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum AgentEvent {
    /// A connect attempt started with a freshly minted session id.
    Connecting { session_id: SessionId, attempt: u32 },

    /// Handshake written; the session is live.
    Connected { session_id: SessionId },

    /// A command arrived and was acknowledged.
    Command {
        session_id: SessionId,
        command: Command,
    },

    /// The coordinator asked this agent to reconnect. No acknowledgment was sent.
    ReconnectRequested {
        session_id: SessionId,
        command: Command,
    },

    /// The session ended and its socket is closed.
    Disconnected {
        session_id: SessionId,
        reason: DisconnectReason,
    },
}

/// Why a connected session ended.
#[derive(Debug)]
pub enum DisconnectReason {
    ReconnectRequested,
    /// Clean end-of-stream from the coordinator.
    PeerClosed,
    Failed(ConnectionFailure),
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ReconnectRequested => {
                f.write_str("reconnect requested by coordinator")
            }
            DisconnectReason::PeerClosed => f.write_str("coordinator closed the connection"),
            DisconnectReason::Failed(failure) => write!(f, "{failure}"),
            DisconnectReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Outcome of one connected session, returned by
/// [`AgentConnection::run`](crate::AgentConnection::run).
#[derive(Debug)]
pub struct SessionReport {
    pub reason: DisconnectReason,
    /// Frames read from the coordinator, including a final reconnect directive.
    pub frames_received: u64,
    /// Time between the handshake and teardown.
    pub connected_for: Duration,
}

impl SessionReport {
    /// A session counts as established if the coordinator spoke on it, asked
    /// for the reconnect itself, or it stayed up for at least `stable_after`.
    ///
    /// Anything else (accepted, then dropped without a word) is treated like a
    /// failed connect attempt by the supervisor.
    pub fn is_stable(&self, stable_after: Duration) -> bool {
        matches!(self.reason, DisconnectReason::ReconnectRequested)
            || self.frames_received > 0
            || self.connected_for >= stable_after
    }
}
