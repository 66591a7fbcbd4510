//! Handle to one agent connection held by the coordinator.
//!
//! The link's close token is shared with its [`FrameWriter`]: closing the
//! link wakes the session's read loop and aborts any write parked on an
//! agent that stopped reading.

use crate::dispatch::CommandSink;
use async_trait::async_trait;
use bot_protocol::{ActivityClock, FrameError, FrameWriter, SessionId, TenantId};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;

/// The registry's handle on one live session.
#[derive(Clone)]
pub struct AgentLink {
    tenant_id: TenantId,
    session_id: SessionId,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    writer: FrameWriter<OwnedWriteHalf>,
    last_seen: ActivityClock,
    /// Same token the writer was built with.
    closer: CancellationToken,
}

impl AgentLink {
    pub(crate) fn new(
        tenant_id: TenantId,
        session_id: SessionId,
        remote_addr: SocketAddr,
        writer: FrameWriter<OwnedWriteHalf>,
        last_seen: ActivityClock,
        closer: CancellationToken,
    ) -> Self {
        Self {
            tenant_id,
            session_id,
            remote_addr,
            connected_at: SystemTime::now(),
            writer,
            last_seen,
            closer,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Touched by every inbound frame. Outbound writes do not count, so a
    /// silent agent goes idle even while commands are still being pushed.
    pub fn last_seen(&self) -> &ActivityClock {
        &self.last_seen
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.idle_for()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    pub(crate) fn writer(&self) -> &FrameWriter<OwnedWriteHalf> {
        &self.writer
    }

    pub(crate) fn closer(&self) -> &CancellationToken {
        &self.closer
    }
}

impl std::fmt::Debug for AgentLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLink")
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[async_trait]
impl CommandSink for AgentLink {
    async fn send_payload(&self, payload: &[u8]) -> Result<(), FrameError> {
        self.writer.send(payload).await
    }

    /// Wakes the session's read loop, which then unregisters and closes the
    /// socket. A write in flight fails with [`FrameError::Closed`].
    fn close(&self) {
        self.closer.cancel();
    }
}
