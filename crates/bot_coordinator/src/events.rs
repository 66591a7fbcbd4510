//! Notifications published by a running [`Coordinator`](crate::Coordinator).

use bot_protocol::{SessionId, TenantId};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// A tenant completed its handshake and had no prior session.
    SessionRegistered {
        tenant_id: TenantId,
        session_id: SessionId,
        remote_addr: SocketAddr,
    },

    /// A tenant handshook again; `previous` has been closed.
    SessionReplaced {
        tenant_id: TenantId,
        previous: SessionId,
        current: SessionId,
        remote_addr: SocketAddr,
    },

    /// An `ACK:` frame arrived. Not tied to any particular command.
    Acknowledged {
        tenant_id: TenantId,
        session_id: SessionId,
    },

    /// A keepalive (repeated handshake) frame arrived.
    Heartbeat {
        tenant_id: TenantId,
        session_id: SessionId,
    },

    SessionClosed {
        tenant_id: TenantId,
        session_id: SessionId,
        reason: String,
    },

    /// The reaper closed a session that had gone silent.
    SessionEvicted {
        tenant_id: TenantId,
        session_id: SessionId,
        idle: Duration,
    },
}

impl CoordinatorEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            CoordinatorEvent::SessionRegistered { tenant_id, .. }
            | CoordinatorEvent::SessionReplaced { tenant_id, .. }
            | CoordinatorEvent::Acknowledged { tenant_id, .. }
            | CoordinatorEvent::Heartbeat { tenant_id, .. }
            | CoordinatorEvent::SessionClosed { tenant_id, .. }
            | CoordinatorEvent::SessionEvicted { tenant_id, .. } => *tenant_id,
        }
    }
}
