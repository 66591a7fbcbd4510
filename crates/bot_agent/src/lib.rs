//! # Bot Agent
//!
//! The client half of the botlink control channel. An agent sits next to a
//! game-server instance, holds one long-lived TCP connection to the
//! coordinator, and survives coordinator restarts, network blips and explicit
//! reconnect directives on its own.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closing -> Disconnected
//!                     |                                   ^
//!                     +------------- failure -------------+
//! ```
//!
//! * [`AgentConnection`] drives a single session: TCP connect, handshake,
//!   read loop, acknowledgments and keepalive.
//! * [`AgentSupervisor`] owns the connection task and re-enters the connect
//!   sequence after every termination. It waits on a [`BackoffPolicy`] after
//!   failed connect attempts and after sessions that were accepted but closed
//!   before they became stable. It stops only when the shared
//!   [`CancellationToken`](tokio_util::sync::CancellationToken) is cancelled.
//!
//! Decoded commands and the forced-reconnect notification reach the owner as
//! [`AgentEvent`]s on a channel.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod session;
pub mod supervisor;

pub use backoff::{BackoffPolicy, BackoffStrategy, ExponentialBackoff, FixedBackoff};
pub use config::AgentConfig;
pub use connection::AgentConnection;
pub use error::ConnectionFailure;
pub use events::{AgentEvent, DisconnectReason, SessionReport};
pub use session::{AgentSession, ConnectionState};
pub use supervisor::AgentSupervisor;
