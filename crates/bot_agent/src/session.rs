//! Per-attempt session state.
//!
//! An [`AgentSession`] is created when a connect attempt begins and dropped
//! when its socket closes. The next attempt always builds a brand-new value
//! with a brand-new [`SessionId`]; nothing is carried over.

use bot_protocol::{ActivityClock, ControlMessage, SessionId, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug)]
pub struct AgentSession {
    tenant_id: TenantId,
    session_id: SessionId,
    state: ConnectionState,
    activity: ActivityClock,
    reporter: Arc<watch::Sender<ConnectionState>>,
}

impl AgentSession {
    /// Starts a new attempt: mints a session id and enters `Connecting`.
    pub fn begin(tenant_id: TenantId, reporter: Arc<watch::Sender<ConnectionState>>) -> Self {
        let mut session = Self {
            tenant_id,
            session_id: SessionId::new(),
            state: ConnectionState::Disconnected,
            activity: ActivityClock::new(),
            reporter,
        };
        session.transition(ConnectionState::Connecting);
        session
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }

    /// Unix-millisecond timestamp of the last frame sent or received.
    pub fn last_activity_ms(&self) -> u64 {
        self.activity.last_activity_ms()
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    /// Observes this session's state as published to the shared reporter.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.reporter.subscribe()
    }

    /// Handshake and heartbeat payload for this session.
    pub fn hello(&self) -> ControlMessage {
        ControlMessage::hello(self.tenant_id, self.session_id)
    }

    /// Acknowledgment payload for this session.
    pub fn ack(&self) -> ControlMessage {
        ControlMessage::ack(self.tenant_id, self.session_id)
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        self.state = next;
        self.reporter.send_replace(next);
    }
}
