//! Serialized outbound path for one connection.
//!
//! The keepalive timer, the acknowledgment sender and command dispatchers may
//! all write to the same socket. Every frame is encoded up front and written
//! with a single `write_all` while holding the connection's write lock, so two
//! frames can never interleave on the wire.
//!
//! A peer that stops reading fills the socket buffer and parks the writer
//! inside `write_all` with the lock held. Sends therefore race the writer's
//! close token and an optional write timeout; either one drops the in-flight
//! write, which releases the lock.

use crate::activity::ActivityClock;
use crate::codec::encode;
use crate::command::Command;
use crate::error::{FrameError, ProtocolError};
use crate::message::ControlMessage;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Cloneable handle to the write half of one connection.
///
/// Clones share the socket, the activity clock and the close token.
pub struct FrameWriter<W> {
    /// Write half, locked for the duration of one frame.
    inner: Arc<Mutex<W>>,
    /// Touched after every frame that reached the socket.
    activity: ActivityClock,
    /// Cancelled once the connection is being torn down. Pending and future
    /// sends fail with [`FrameError::Closed`].
    closed: CancellationToken,
    /// Upper bound on one frame's lock wait plus write. `None` waits forever.
    write_timeout: Option<Duration>,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            activity: self.activity.clone(),
            closed: self.closed.clone(),
            write_timeout: self.write_timeout,
        }
    }
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps `writer`. Successful writes touch `activity`; cancelling `closed`
    /// aborts any frame still waiting on the socket.
    pub fn new(writer: W, activity: ActivityClock, closed: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
            activity,
            closed,
            write_timeout: None,
        }
    }

    /// Bounds every send. A send that exceeds `timeout` closes the writer,
    /// since a partial frame may already be on the wire.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Writes one frame carrying `payload`.
    ///
    /// # Errors
    ///
    /// * [`FrameError::InvalidLength`] if `payload` is empty or too large.
    /// * [`FrameError::Closed`] if the writer is closed before the frame is
    ///   fully flushed.
    /// * [`FrameError::WriteTimeout`] if the peer stalls past the write timeout.
    /// * [`FrameError::Io`] on a transport failure.
    pub async fn send(&self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode(payload)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(FrameError::Closed),
            result = self.write_frame(&frame) => result?,
        }

        self.activity.touch();
        Ok(())
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), FrameError> {
        let write = async {
            let mut writer = self.inner.lock().await;
            writer.write_all(frame).await?;
            writer.flush().await?;
            Ok::<(), FrameError>(())
        };

        match self.write_timeout {
            None => write.await,
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => {
                    self.closed.cancel();
                    Err(FrameError::WriteTimeout(limit))
                }
            },
        }
    }

    pub async fn send_control(&self, message: &ControlMessage) -> Result<(), FrameError> {
        self.send(message.to_text().as_bytes()).await
    }

    pub async fn send_command(&self, command: &Command) -> Result<(), ProtocolError> {
        let payload = command.to_bytes()?;
        self.send(&payload).await?;
        Ok(())
    }

    /// Marks the writer closed without touching the socket.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Closes the writer, then shuts down the write direction.
    ///
    /// Closing first aborts any send parked on a stalled peer, so the lock is
    /// free by the time it is needed here.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.closed.cancel();
        self.inner.lock().await.shutdown().await
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_frame;
    use crate::message::SessionId;
    use tokio::time::timeout;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_writers_never_interleave() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = FrameWriter::new(client, ActivityClock::new(), CancellationToken::new());

        let session_id = SessionId::new();
        let heartbeat = ControlMessage::hello(42, session_id);
        let ack = ControlMessage::ack(42, session_id);
        let big = Command::new().with_raw_data("z".repeat(4096));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let w = writer.clone();
            tasks.push(tokio::spawn(async move { w.send_control(&heartbeat).await.unwrap() }));
            let w = writer.clone();
            tasks.push(tokio::spawn(async move { w.send_control(&ack).await.unwrap() }));
            let w = writer.clone();
            let big = big.clone();
            tasks.push(tokio::spawn(async move { w.send_command(&big).await.unwrap() }));
        }

        let reader = tokio::spawn(async move {
            let mut counts = (0, 0, 0);
            for _ in 0..60 {
                let payload = read_frame(&mut server).await.unwrap().unwrap();
                if let Ok(message) = ControlMessage::from_payload(&payload) {
                    match message {
                        ControlMessage::Hello { .. } => counts.0 += 1,
                        ControlMessage::Ack { .. } => counts.1 += 1,
                    }
                } else {
                    let command = Command::from_bytes(&payload).expect("intact command frame");
                    assert_eq!(command.raw_data.map(|r| r.len()), Some(4096));
                    counts.2 += 1;
                }
            }
            counts
        });

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(reader.await.unwrap(), (20, 20, 20));
    }

    #[tokio::test]
    async fn test_send_touches_activity() {
        let (client, _server) = tokio::io::duplex(1024);
        let activity = ActivityClock::new();
        let writer = FrameWriter::new(client, activity.clone(), CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = activity.last_activity_ms();
        writer.send(b"ping").await.unwrap();
        assert!(activity.last_activity_ms() > before);
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (client, server) = tokio::io::duplex(16);
        drop(server);
        let writer = FrameWriter::new(client, ActivityClock::new(), CancellationToken::new());
        assert!(matches!(writer.send(b"hello").await, Err(FrameError::Io(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_releases_send_parked_on_stalled_peer() {
        // The peer half stays alive but is never read.
        let (client, _server) = tokio::io::duplex(64);
        let closed = CancellationToken::new();
        let writer = FrameWriter::new(client, ActivityClock::new(), closed.clone());

        let parked = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send(&vec![7u8; 4096]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parked.is_finished());

        closed.cancel();
        let result = timeout(Duration::from_secs(1), parked)
            .await
            .expect("send should observe the close")
            .unwrap();
        assert!(matches!(result, Err(FrameError::Closed)));
        assert!(matches!(writer.send(b"ping").await, Err(FrameError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_does_not_wait_on_stalled_peer() {
        let (client, _server) = tokio::io::duplex(64);
        let writer = FrameWriter::new(client, ActivityClock::new(), CancellationToken::new());

        let parked = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send(&vec![7u8; 4096]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(1), writer.shutdown())
            .await
            .expect("shutdown should not block on the parked send")
            .unwrap();
        assert!(writer.is_closed());
        assert!(matches!(parked.await.unwrap(), Err(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_write_timeout_closes_writer() {
        let (client, _server) = tokio::io::duplex(64);
        let writer = FrameWriter::new(client, ActivityClock::new(), CancellationToken::new())
            .with_write_timeout(Duration::from_millis(100));

        let result = writer.send(&vec![7u8; 4096]).await;
        assert!(matches!(result, Err(FrameError::WriteTimeout(_))));
        assert!(writer.is_closed());
        assert!(matches!(writer.send(b"ping").await, Err(FrameError::Closed)));
    }
}
