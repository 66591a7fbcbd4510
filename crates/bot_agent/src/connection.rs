//! A single agent session over one TCP socket.
//!
//! [`AgentConnection::connect`] covers `Connecting -> Connected` (TCP connect
//! plus handshake). [`AgentConnection::run`] then owns the session until it
//! ends: it reads command frames in arrival order, acknowledges each one,
//! hands it to the owner, and keeps the link warm with a heartbeat task that
//! shares the connection's single writer.
//!
//! The writer's close token is a child of the shutdown token, so cancelling
//! shutdown also aborts a heartbeat or acknowledgment stuck on a coordinator
//! that stopped reading. Every write is additionally bounded by
//! [`AgentConfig::write_timeout`].

use crate::config::AgentConfig;
use crate::error::ConnectionFailure;
use crate::events::{AgentEvent, DisconnectReason, SessionReport};
use crate::session::{AgentSession, ConnectionState};
use bot_protocol::{read_frame, Command, ControlMessage, FrameError, FrameWriter};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A connected session that has written its handshake and not yet started
/// reading.
pub struct AgentConnection {
    /// Identity and lifecycle state of this attempt.
    session: AgentSession,
    reader: OwnedReadHalf,
    /// Shared by the read loop (acknowledgments) and the keepalive task.
    writer: FrameWriter<OwnedWriteHalf>,
    keepalive_interval: Duration,
}

impl AgentConnection {
    /// Connects to the coordinator and writes the handshake.
    ///
    /// On failure the session is moved to `Disconnected` and dropped; no retry
    /// happens here.
    ///
    /// # Returns
    ///
    /// A connection in the `Connected` state, ready for [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// * [`ConnectionFailure::Connect`] if the TCP connect fails.
    /// * [`ConnectionFailure::Handshake`] if the handshake frame cannot be written.
    /// * [`ConnectionFailure::ConnectTimeout`] if both together exceed
    ///   `config.connect_timeout`.
    /// * [`ConnectionFailure::Cancelled`] if `shutdown` fires first.
    pub async fn connect(
        config: &AgentConfig,
        mut session: AgentSession,
        shutdown: &CancellationToken,
    ) -> Result<Self, ConnectionFailure> {
        let address = config.coordinator_address.clone();
        let hello = session.hello();
        let activity = session.activity().clone();

        debug!(
            tenant_id = session.tenant_id(),
            session_id = %session.session_id(),
            "Connecting to coordinator at {}",
            address
        );

        let attempt = async {
            let stream = TcpStream::connect(&address)
                .await
                .map_err(|source| ConnectionFailure::Connect {
                    address: address.clone(),
                    source,
                })?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY: {}", e);
            }

            let (reader, write_half) = stream.into_split();
            let writer = FrameWriter::new(write_half, activity, shutdown.child_token())
                .with_write_timeout(config.write_timeout);
            writer
                .send_control(&hello)
                .await
                .map_err(ConnectionFailure::Handshake)?;
            Ok((reader, writer))
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ConnectionFailure::Cancelled),
            outcome = tokio::time::timeout(config.connect_timeout, attempt) => {
                outcome.unwrap_or_else(|_| Err(ConnectionFailure::ConnectTimeout(address.clone())))
            }
        };

        match result {
            Ok((reader, writer)) => {
                session.transition(ConnectionState::Connected);
                Ok(Self {
                    session,
                    reader,
                    writer,
                    keepalive_interval: config.keepalive_interval,
                })
            }
            Err(failure) => {
                session.transition(ConnectionState::Disconnected);
                Err(failure)
            }
        }
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    /// Runs the read loop and keepalive until the session ends, then closes
    /// the socket and reports why.
    ///
    /// Decoded commands are sent to `events` after their acknowledgment is
    /// written. A reconnect directive is forwarded as
    /// [`AgentEvent::ReconnectRequested`] and is never acknowledged.
    ///
    /// # Returns
    ///
    /// A [`SessionReport`] with the [`DisconnectReason`], the number of frames
    /// received and how long the session stayed connected.
    pub async fn run(
        self,
        events: &mpsc::UnboundedSender<AgentEvent>,
        shutdown: &CancellationToken,
    ) -> SessionReport {
        let AgentConnection {
            mut session,
            mut reader,
            writer,
            keepalive_interval,
        } = self;
        let session_id = session.session_id();
        let ack = session.ack();
        let started = Instant::now();
        let mut frames_received: u64 = 0;

        let mut keepalive = spawn_keepalive(
            writer.clone(),
            session.hello(),
            keepalive_interval,
            session.subscribe(),
        );

        let reason = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break DisconnectReason::Shutdown,
                failed = &mut keepalive => {
                    let failure = match failed {
                        Ok(error) => error,
                        Err(join_error) => FrameError::Io(std::io::Error::other(join_error)),
                    };
                    break DisconnectReason::Failed(ConnectionFailure::Keepalive(failure));
                }
                frame = read_frame(&mut reader) => frame,
            };

            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => break DisconnectReason::PeerClosed,
                Err(e) => break DisconnectReason::Failed(ConnectionFailure::Protocol(e.into())),
            };
            session.activity().touch();
            frames_received += 1;

            let command = match Command::from_bytes(&payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!(%session_id, "Undecodable command frame: {}", e);
                    break DisconnectReason::Failed(ConnectionFailure::Protocol(e));
                }
            };

            if command.is_reconnect_directive() {
                info!(%session_id, "Coordinator requested reconnect");
                let _ = events.send(AgentEvent::ReconnectRequested {
                    session_id,
                    command,
                });
                break DisconnectReason::ReconnectRequested;
            }

            let acked = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break DisconnectReason::Shutdown,
                acked = writer.send_control(&ack) => acked,
            };
            if let Err(e) = acked {
                break DisconnectReason::Failed(ConnectionFailure::Acknowledge(e));
            }
            debug!(%session_id, entries = command.entries.len(), "Command acknowledged");
            let _ = events.send(AgentEvent::Command {
                session_id,
                command,
            });
        };

        session.transition(ConnectionState::Closing);
        keepalive.abort();
        if let Err(e) = writer.shutdown().await {
            debug!(%session_id, "Socket shutdown error: {}", e);
        }
        drop(reader);
        drop(writer);
        session.transition(ConnectionState::Disconnected);

        SessionReport {
            reason,
            frames_received,
            connected_for: started.elapsed(),
        }
    }
}

/// Writes the heartbeat every `period` while the session is `Connected`.
/// Completes only when a write fails.
fn spawn_keepalive(
    writer: FrameWriter<OwnedWriteHalf>,
    heartbeat: ControlMessage,
    period: Duration,
    state: watch::Receiver<ConnectionState>,
) -> JoinHandle<FrameError> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if *state.borrow() != ConnectionState::Connected {
                continue;
            }

            match writer.send_control(&heartbeat).await {
                Ok(()) => debug!(session_id = %heartbeat.session_id(), "Heartbeat sent"),
                Err(e) => {
                    warn!(session_id = %heartbeat.session_id(), "Heartbeat failed: {}", e);
                    return e;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bot_protocol::{encode, CommandItem, CommandKind, ProtocolError};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn test_config(addr: std::net::SocketAddr) -> AgentConfig {
        AgentConfig {
            coordinator_address: addr.to_string(),
            tenant_id: 42,
            keepalive_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn reporter() -> Arc<watch::Sender<ConnectionState>> {
        Arc::new(watch::channel(ConnectionState::Disconnected).0)
    }

    async fn read_text(stream: &mut TcpStream) -> Option<String> {
        read_frame(stream)
            .await
            .unwrap()
            .map(|payload| String::from_utf8(payload).unwrap())
    }

    async fn connected_pair(
        config: &AgentConfig,
        listener: &TcpListener,
    ) -> (AgentConnection, TcpStream) {
        let session = AgentSession::begin(config.tenant_id, reporter());
        let shutdown = CancellationToken::new();
        let (connection, accepted) = tokio::join!(
            AgentConnection::connect(config, session, &shutdown),
            listener.accept()
        );
        (connection.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_writes_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());

        let (connection, mut peer) = connected_pair(&config, &listener).await;
        assert_eq!(connection.session().state(), ConnectionState::Connected);

        let handshake = read_text(&mut peer).await.unwrap();
        assert_eq!(handshake, format!("42:{}", connection.session().session_id()));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter = reporter();
        let session = AgentSession::begin(42, reporter.clone());
        let shutdown = CancellationToken::new();
        let result = AgentConnection::connect(&test_config(addr), session, &shutdown).await;

        assert!(matches!(result, Err(ConnectionFailure::Connect { .. })));
        assert_eq!(*reporter.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_short_circuits_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Non-routable address: the connect would otherwise hang until the timeout.
        let config = AgentConfig {
            coordinator_address: "10.255.255.1:7000".to_string(),
            connect_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let session = AgentSession::begin(1, reporter());
        let result = timeout(
            Duration::from_secs(2),
            AgentConnection::connect(&config, session, &shutdown),
        )
        .await
        .expect("cancellation must be prompt");
        assert!(matches!(result, Err(ConnectionFailure::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_command_is_acknowledged_then_emitted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());
        let (connection, mut peer) = connected_pair(&config, &listener).await;
        let session_id = connection.session().session_id();
        let _handshake = read_text(&mut peer).await;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { connection.run(&events_tx, &shutdown).await })
        };

        let command = Command::announce("hello");
        peer.write_all(&encode(&command.to_bytes().unwrap()).unwrap()).await.unwrap();

        assert_eq!(read_text(&mut peer).await.unwrap(), format!("ACK:42:{session_id}"));
        match timeout(Duration::from_secs(2), events_rx.recv()).await.unwrap() {
            Some(AgentEvent::Command { session_id: id, command: received }) => {
                assert_eq!(id, session_id);
                assert_eq!(received, command);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        shutdown.cancel();
        let report = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(report.reason, DisconnectReason::Shutdown));
        assert_eq!(report.frames_received, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_directive_is_not_acknowledged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());
        let (connection, mut peer) = connected_pair(&config, &listener).await;
        let _handshake = read_text(&mut peer).await;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(async move {
            connection.run(&events_tx, &CancellationToken::new()).await
        });

        let directive = Command::announce("bye")
            .with_entry(CommandItem::new(CommandKind::ReconnectDirective));
        peer.write_all(&encode(&directive.to_bytes().unwrap()).unwrap()).await.unwrap();
        // Anything after the directive must be ignored.
        let late = encode(&Command::announce("late").to_bytes().unwrap()).unwrap();
        peer.write_all(&late).await.unwrap();

        let report = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(report.reason, DisconnectReason::ReconnectRequested));
        assert_eq!(report.frames_received, 1);

        match events_rx.recv().await {
            Some(AgentEvent::ReconnectRequested { command, .. }) => assert_eq!(command, directive),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events_rx.recv().await.is_none());

        // The agent closed its side without writing an ACK. Unread input on the
        // agent side may turn the close into a reset.
        assert!(matches!(read_frame(&mut peer).await, Ok(None) | Err(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_frame_is_connection_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());
        let (connection, mut peer) = connected_pair(&config, &listener).await;

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(async move {
            connection.run(&events_tx, &CancellationToken::new()).await
        });

        peer.write_all(&(2 * 1024 * 1024u32).to_be_bytes()).await.unwrap();

        let report = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(
            report.reason,
            DisconnectReason::Failed(ConnectionFailure::Protocol(ProtocolError::Frame(
                FrameError::InvalidLength(_)
            )))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_garbage_payload_is_connection_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());
        let (connection, mut peer) = connected_pair(&config, &listener).await;

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(async move {
            connection.run(&events_tx, &CancellationToken::new()).await
        });

        peer.write_all(&encode(b"not a command").unwrap()).await.unwrap();

        let report = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(
            report.reason,
            DisconnectReason::Failed(ConnectionFailure::Protocol(ProtocolError::Serialization(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_peer_close_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config(listener.local_addr().unwrap());
        let (connection, peer) = connected_pair(&config, &listener).await;

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn(async move {
            connection.run(&events_tx, &CancellationToken::new()).await
        });
        drop(peer);

        let report = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(
            report.reason,
            DisconnectReason::PeerClosed | DisconnectReason::Failed(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keepalive_repeats_handshake_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = AgentConfig {
            keepalive_interval: Duration::from_millis(50),
            ..test_config(listener.local_addr().unwrap())
        };
        let (connection, mut peer) = connected_pair(&config, &listener).await;
        let expected = format!("42:{}", connection.session().session_id());

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { connection.run(&events_tx, &shutdown).await })
        };

        // Handshake followed by at least two heartbeats of the same shape.
        for _ in 0..3 {
            let text = timeout(Duration::from_secs(2), read_text(&mut peer)).await.unwrap();
            assert_eq!(text.as_deref(), Some(expected.as_str()));
        }

        shutdown.cancel();
        timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
    }
}
