//! Coordinator settings and their defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Listener and admission settings for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the accept loop listens on.
    pub bind_address: SocketAddr,
    /// Upper bound on registered tenants. New tenants beyond it are refused;
    /// a tenant replacing its own session is always admitted.
    pub max_sessions: usize,
    /// How long a fresh connection may take to send its handshake.
    pub handshake_timeout: Duration,
    /// Sessions silent for longer than this are evicted by the reaper.
    /// Zero disables eviction.
    pub session_timeout: Duration,
    /// How often the reaper looks for silent sessions. Zero disables it.
    pub reap_interval: Duration,
    /// Upper bound on one outbound frame. An agent that stops reading for
    /// this long fails the dispatch and loses its session.
    pub write_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 7000)),
            max_sessions: 1000,
            handshake_timeout: Duration::from_secs(10),
            // Three keepalive periods.
            session_timeout: Duration::from_secs(360),
            reap_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
        }
    }
}
