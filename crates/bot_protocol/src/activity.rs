//! Last-activity tracking for a single connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Timestamp of the last frame successfully sent or received on a connection.
///
/// Cloning shares the underlying clock, so the writer, the read loop and any
/// observer all see the same value.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last: Arc<AtomicU64>,
}

impl ActivityClock {
    /// Creates a clock stamped with the current time.
    pub fn new() -> Self {
        Self {
            last: Arc::new(AtomicU64::new(current_timestamp_ms())),
        }
    }

    /// Records activity now.
    pub fn touch(&self) {
        self.last.store(current_timestamp_ms(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }

    /// How long the connection has been silent.
    pub fn idle_for(&self) -> Duration {
        let now = current_timestamp_ms();
        Duration::from_millis(now.saturating_sub(self.last_activity_ms()))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
