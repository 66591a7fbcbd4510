//! Error types for the coordinator service, registration and dispatch.

use bot_protocol::{FrameError, ProtocolError, SessionId, TenantId};
use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Why a dispatched command did not reach its tenant.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Nothing is registered for the tenant. No write was attempted.
    #[error("no active session for tenant {0}")]
    NoActiveSession(TenantId),

    /// The command could not be serialized. The session is untouched.
    #[error("command serialization failed: {0}")]
    Serialization(#[source] ProtocolError),

    /// The serialized command exceeds the frame limit. The session is untouched.
    #[error("command of {0} bytes exceeds the frame limit")]
    TooLarge(usize),

    /// The socket write failed. The session has been unregistered and closed.
    #[error("write to tenant {tenant_id} session {session_id} failed: {source}")]
    WriteFailed {
        tenant_id: TenantId,
        session_id: SessionId,
        #[source]
        source: FrameError,
    },
}

/// Why a handshake was not admitted into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// The handshake repeated the session id already registered for its
    /// tenant. Admitting it would let the older handler unregister the newer.
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),

    /// The tenant is new and the session limit is reached.
    #[error("session limit of {0} reached")]
    AtCapacity(usize),
}
