//! Reconnect-with-backoff driver wrapping [`AgentConnection`].

use crate::backoff::BackoffPolicy;
use crate::config::AgentConfig;
use crate::connection::AgentConnection;
use crate::error::ConnectionFailure;
use crate::events::{AgentEvent, DisconnectReason};
use crate::session::{AgentSession, ConnectionState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Keeps an agent connected until shutdown.
///
/// A session that was established (see
/// [`SessionReport::is_stable`](crate::SessionReport::is_stable)) leads
/// straight into a new connect attempt when it ends. Failed connect attempts
/// and sessions the coordinator dropped before they became stable wait on the
/// backoff policy first, and that wait is cancellable. The supervisor never
/// gives up on its own.
pub struct AgentSupervisor {
    config: AgentConfig,
    backoff: Box<dyn BackoffPolicy>,
    events: mpsc::UnboundedSender<AgentEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl AgentSupervisor {
    /// Creates a supervisor and the receiving end of its event channel.
    pub fn new(config: AgentConfig) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = config.backoff.clone().into_policy();

        let supervisor = Self {
            config,
            backoff,
            events,
            state: Arc::new(state),
        };
        (supervisor, receiver)
    }

    /// Replaces the backoff policy derived from the config.
    pub fn with_backoff(mut self, policy: Box<dyn BackoffPolicy>) -> Self {
        self.backoff = policy;
        self
    }

    /// Observes the lifecycle state of whichever session is current.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Runs the supervisor on its own task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connects, serves, and reconnects until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            tenant_id = self.config.tenant_id,
            "Agent supervisor starting, coordinator at {}", self.config.coordinator_address
        );

        // Consecutive attempts that did not produce a stable session.
        let mut failures: u32 = 0;

        while !shutdown.is_cancelled() {
            let session = AgentSession::begin(self.config.tenant_id, self.state.clone());
            let session_id = session.session_id();
            let _ = self.events.send(AgentEvent::Connecting {
                session_id,
                attempt: failures + 1,
            });

            match AgentConnection::connect(&self.config, session, &shutdown).await {
                Ok(connection) => {
                    info!(%session_id, "🔗 Connected to coordinator");
                    let _ = self.events.send(AgentEvent::Connected { session_id });

                    let report = connection.run(&self.events, &shutdown).await;
                    match &report.reason {
                        DisconnectReason::Failed(failure) => {
                            warn!(%session_id, "Connection lost: {}", failure)
                        }
                        other => info!(%session_id, "Session ended: {}", other),
                    }

                    let stable = report.is_stable(self.config.stable_after);
                    let stop = matches!(report.reason, DisconnectReason::Shutdown);
                    let _ = self.events.send(AgentEvent::Disconnected {
                        session_id,
                        reason: report.reason,
                    });
                    if stop {
                        break;
                    }
                    if stable {
                        failures = 0;
                        self.backoff.reset();
                        continue;
                    }

                    warn!(
                        %session_id,
                        "Session closed after {:?} without traffic from the coordinator",
                        report.connected_for
                    );
                }
                Err(ConnectionFailure::Cancelled) => break,
                Err(failure) => {
                    warn!(%session_id, "Connect attempt failed: {}", failure);
                    let _ = self.events.send(AgentEvent::Disconnected {
                        session_id,
                        reason: DisconnectReason::Failed(failure),
                    });
                }
            }

            failures = failures.saturating_add(1);
            let delay = self.backoff.next_delay(failures);
            if failures == 1 {
                info!(%session_id, "⏳ Retrying in {:?}", delay);
            } else {
                error!(
                    %session_id,
                    attempt = failures,
                    "⏳ Still not connected, retrying in {:?}",
                    delay
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!(tenant_id = self.config.tenant_id, "Agent supervisor stopped");
    }
}
