//! Pushing commands to a tenant's live session.

use crate::error::DispatchError;
use crate::registry::SessionRegistry;
use async_trait::async_trait;
use bot_protocol::{Command, FrameError, SessionId, TenantId, MAX_FRAME_SIZE};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Write side of a registered session, as seen by the dispatcher.
#[async_trait]
pub trait CommandSink: Clone + Send + Sync + 'static {
    /// Writes one frame carrying `payload`.
    async fn send_payload(&self, payload: &[u8]) -> Result<(), FrameError>;

    /// Closes the underlying session. Idempotent.
    fn close(&self);
}

/// Where a command was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
}

/// Fire-and-forget command delivery over the registry's live sessions.
///
/// Nothing is queued. A tenant without a session fails immediately, and a
/// session whose write fails is dropped; the caller decides whether to retry
/// once the agent has reconnected.
pub struct CommandDispatch<H> {
    /// Shared with the coordinator's accept loop.
    registry: Arc<SessionRegistry<H>>,
}

impl<H> Clone for CommandDispatch<H> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<H: CommandSink> CommandDispatch<H> {
    pub fn new(registry: Arc<SessionRegistry<H>>) -> Self {
        Self { registry }
    }

    /// Writes `command` as one frame on the tenant's current session.
    ///
    /// Success means the frame was written, not that the agent executed it.
    /// A failed write unregisters and closes that session so it cannot be
    /// picked again.
    ///
    /// # Returns
    ///
    /// The tenant and the session id the frame went to.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::NoActiveSession`] if the tenant has no session.
    /// * [`DispatchError::Serialization`] if the command cannot be encoded.
    /// * [`DispatchError::TooLarge`] if the encoded command exceeds
    ///   [`MAX_FRAME_SIZE`]. The session is left registered.
    /// * [`DispatchError::WriteFailed`] if the write fails, is closed under
    ///   it, or times out. The session has been dropped.
    pub async fn send(
        &self,
        tenant_id: TenantId,
        command: &Command,
    ) -> Result<Delivery, DispatchError> {
        let registered = self
            .registry
            .lookup_session(tenant_id)
            .ok_or(DispatchError::NoActiveSession(tenant_id))?;

        let payload = command.to_bytes().map_err(DispatchError::Serialization)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(DispatchError::TooLarge(payload.len()));
        }

        let session_id = registered.session_id;
        match registered.handle.send_payload(&payload).await {
            Ok(()) => {
                debug!(tenant_id, %session_id, bytes = payload.len(), "Command dispatched");
                Ok(Delivery { tenant_id, session_id })
            }
            Err(source) => {
                warn!(tenant_id, %session_id, "Dropping session after failed write: {}", source);
                self.registry.unregister(tenant_id, session_id);
                registered.handle.close();
                Err(DispatchError::WriteFailed {
                    tenant_id,
                    session_id,
                    source,
                })
            }
        }
    }

    /// Tells the tenant's agent to drop its session and reconnect.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn request_reconnect(&self, tenant_id: TenantId) -> Result<Delivery, DispatchError> {
        self.send(tenant_id, &Command::reconnect()).await
    }

    /// Sends `command` to every registered tenant concurrently.
    ///
    /// # Returns
    ///
    /// One result per tenant registered when the call started, in no
    /// particular order.
    pub async fn broadcast(
        &self,
        command: &Command,
    ) -> Vec<(TenantId, Result<Delivery, DispatchError>)> {
        let sends = self
            .registry
            .tenants()
            .into_iter()
            .map(|tenant_id| async move { (tenant_id, self.send(tenant_id, command).await) });
        join_all(sends).await
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<H>> {
        &self.registry
    }
}
