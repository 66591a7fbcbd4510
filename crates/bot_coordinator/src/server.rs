//! Accept loop, handshake and per-session read loop.
//!
//! Every accepted socket runs on its own task in a [`JoinSet`]. After the
//! handshake the session is admitted through
//! [`SessionRegistry::try_register`], which applies the duplicate-session and
//! session-limit rules atomically. Each session's close token is a child of
//! the shutdown token and is shared with its writer, so shutdown never waits
//! on a write to an agent that stopped reading.

use crate::config::CoordinatorConfig;
use crate::dispatch::{CommandDispatch, CommandSink};
use crate::error::{CoordinatorError, RegisterError};
use crate::events::CoordinatorEvent;
use crate::link::AgentLink;
use crate::registry::SessionRegistry;
use bot_protocol::{
    read_frame, ActivityClock, ControlMessage, FrameError, FrameWriter, ProtocolError, SessionId,
    TenantId,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Why a connection never became a registered session.
#[derive(Debug, thiserror::Error)]
enum Rejection {
    #[error("no handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("closed before handshake")]
    ClosedEarly,
    #[error("handshake read failed: {0}")]
    Frame(#[from] FrameError),
    #[error("invalid handshake: {0}")]
    Invalid(#[from] ProtocolError),
    #[error("expected handshake, got acknowledgment")]
    UnexpectedAck,
    #[error(transparent)]
    Refused(#[from] RegisterError),
    #[error("coordinator shutting down")]
    ShuttingDown,
}

/// Why a registered session ended.
#[derive(Debug, thiserror::Error)]
enum SessionEnd {
    #[error("closed by coordinator")]
    Closed,
    #[error("agent closed the connection")]
    PeerClosed,
    #[error("read failed: {0}")]
    Frame(#[from] FrameError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

struct Shared {
    config: CoordinatorConfig,
    registry: Arc<SessionRegistry<AgentLink>>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl Shared {
    fn publish(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// The coordinator service. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    /// Builds a coordinator around an existing registry.
    pub fn with_registry(
        config: CoordinatorConfig,
        registry: Arc<SessionRegistry<AgentLink>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                events,
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry<AgentLink>> {
        self.shared.registry.clone()
    }

    pub fn dispatcher(&self) -> CommandDispatch<AgentLink> {
        CommandDispatch::new(self.shared.registry.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.events.subscribe()
    }

    pub async fn bind(&self) -> Result<TcpListener, CoordinatorError> {
        let address = self.shared.config.bind_address;
        TcpListener::bind(address)
            .await
            .map_err(|source| CoordinatorError::Bind { address, source })
    }

    /// Binds the configured address and serves until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CoordinatorError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accepts agents on `listener` until `shutdown` is cancelled, then closes
    /// every session and waits for their tasks to finish.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), CoordinatorError> {
        let local_addr = listener.local_addr()?;
        info!("🚀 Coordinator listening on {}", local_addr);

        let reaper = tokio::spawn(reap_idle_sessions(self.clone(), shutdown.clone()));
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        debug!(%remote_addr, "Accepted connection");
                        sessions.spawn(serve_connection(
                            self.shared.clone(),
                            stream,
                            remote_addr,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        info!(
            "🛑 Coordinator shutting down, closing {} session(s)",
            self.shared.registry.len()
        );
        drop(listener);
        self.close_all();
        while sessions.join_next().await.is_some() {}
        let _ = reaper.await;

        info!("Coordinator stopped");
        Ok(())
    }

    /// Closes every registered session.
    pub fn close_all(&self) {
        for (_, registered) in self.shared.registry.snapshot() {
            registered.handle.close();
        }
    }

    /// Evicts sessions that have been silent longer than the configured
    /// timeout. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let limit = self.shared.config.session_timeout;
        let mut evicted = 0;

        for (tenant_id, registered) in self.shared.registry.snapshot() {
            let idle = registered.handle.idle_for();
            if idle <= limit {
                continue;
            }

            let session_id = registered.session_id;
            warn!(tenant_id, %session_id, "Evicting session idle for {:?}", idle);
            self.shared.registry.unregister(tenant_id, session_id);
            registered.handle.close();
            self.shared.publish(CoordinatorEvent::SessionEvicted {
                tenant_id,
                session_id,
                idle,
            });
            evicted += 1;
        }

        evicted
    }
}

async fn reap_idle_sessions(coordinator: Coordinator, shutdown: CancellationToken) {
    let config = &coordinator.shared.config;
    if config.session_timeout.is_zero() || config.reap_interval.is_zero() {
        debug!("Idle session reaper disabled");
        return;
    }

    let period = config.reap_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = coordinator.evict_idle();
                if evicted > 0 {
                    info!("Reaper evicted {} idle session(s)", evicted);
                }
            }
        }
    }
}

async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%remote_addr, "Failed to set TCP_NODELAY: {}", e);
    }
    let (mut reader, write_half) = stream.into_split();

    let (tenant_id, session_id) = match handshake(&shared, &mut reader, &shutdown).await {
        Ok(identity) => identity,
        Err(rejection) => {
            warn!(%remote_addr, "Rejected connection: {}", rejection);
            return;
        }
    };

    let closer = shutdown.child_token();
    let writer = FrameWriter::new(write_half, ActivityClock::new(), closer.clone())
        .with_write_timeout(shared.config.write_timeout);
    let link = AgentLink::new(
        tenant_id,
        session_id,
        remote_addr,
        writer,
        ActivityClock::new(),
        closer,
    );

    let max_sessions = shared.config.max_sessions;
    let admitted = shared
        .registry
        .try_register(tenant_id, session_id, link.clone(), max_sessions);
    match admitted {
        Err(refused) => {
            let rejection = Rejection::from(refused);
            warn!(tenant_id, %session_id, %remote_addr, "Rejected connection: {}", rejection);
            return;
        }
        Ok(Some(previous)) => {
            info!(
                tenant_id,
                %session_id,
                previous = %previous.session_id,
                "🔄 Session replaced by new handshake from {}", remote_addr
            );
            previous.handle.close();
            shared.publish(CoordinatorEvent::SessionReplaced {
                tenant_id,
                previous: previous.session_id,
                current: session_id,
                remote_addr,
            });
        }
        Ok(None) => {
            info!(tenant_id, %session_id, "✅ Session registered from {}", remote_addr);
            shared.publish(CoordinatorEvent::SessionRegistered {
                tenant_id,
                session_id,
                remote_addr,
            });
        }
    }

    let end = read_session(&shared, &mut reader, &link).await;

    shared.registry.unregister(tenant_id, session_id);
    // Cancels the shared token before taking the write lock.
    if let Err(e) = link.writer().shutdown().await {
        debug!(tenant_id, %session_id, "Socket shutdown failed: {}", e);
    }

    match &end {
        SessionEnd::Closed | SessionEnd::PeerClosed => {
            info!(tenant_id, %session_id, "Session closed: {}", end)
        }
        _ => warn!(tenant_id, %session_id, "Session closed: {}", end),
    }
    shared.publish(CoordinatorEvent::SessionClosed {
        tenant_id,
        session_id,
        reason: end.to_string(),
    });
}

/// Reads the first frame, which must be a `<tenant>:<session>` handshake.
/// Admission is decided later, by the registry.
async fn handshake(
    shared: &Shared,
    reader: &mut OwnedReadHalf,
    shutdown: &CancellationToken,
) -> Result<(TenantId, SessionId), Rejection> {
    let limit = shared.config.handshake_timeout;

    let payload = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Err(Rejection::ShuttingDown),
        read = timeout(limit, read_frame(reader)) => match read {
            Err(_) => return Err(Rejection::HandshakeTimeout(limit)),
            Ok(frame) => frame?.ok_or(Rejection::ClosedEarly)?,
        },
    };

    match ControlMessage::from_payload(&payload)? {
        ControlMessage::Hello {
            tenant_id,
            session_id,
        } => Ok((tenant_id, session_id)),
        ControlMessage::Ack { .. } => Err(Rejection::UnexpectedAck),
    }
}

async fn read_session(
    shared: &Shared,
    reader: &mut OwnedReadHalf,
    link: &AgentLink,
) -> SessionEnd {
    let tenant_id = link.tenant_id();
    let session_id = link.session_id();

    loop {
        let payload = tokio::select! {
            biased;
            _ = link.closer().cancelled() => return SessionEnd::Closed,
            frame = read_frame(reader) => match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => return SessionEnd::PeerClosed,
                Err(e) => return SessionEnd::Frame(e),
            },
        };
        link.last_seen().touch();

        let message = match ControlMessage::from_payload(&payload) {
            Ok(message) => message,
            Err(e) => return SessionEnd::Protocol(e),
        };

        if message.tenant_id() != tenant_id || message.session_id() != session_id {
            warn!(tenant_id, %session_id, "Ignoring frame for another session: {}", message);
            continue;
        }

        match message {
            ControlMessage::Ack { .. } => {
                debug!(tenant_id, %session_id, "Acknowledgment received");
                shared.publish(CoordinatorEvent::Acknowledged {
                    tenant_id,
                    session_id,
                });
            }
            ControlMessage::Hello { .. } => {
                debug!(tenant_id, %session_id, "Heartbeat received");
                shared.publish(CoordinatorEvent::Heartbeat {
                    tenant_id,
                    session_id,
                });
            }
        }
    }
}
