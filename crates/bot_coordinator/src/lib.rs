//! # Bot Coordinator
//!
//! The central half of the botlink control channel. The coordinator accepts
//! agent connections, keeps exactly one authoritative session per tenant, and
//! pushes commands to a chosen tenant's live session.
//!
//! ## Components
//!
//! * [`SessionRegistry`] - concurrent tenant -> session map. A new handshake
//!   from a tenant replaces its previous session; disconnect handlers only
//!   remove the entry they registered.
//! * [`CommandDispatch`] - looks a tenant up and writes one framed command.
//!   There is no store-and-forward: an offline tenant yields
//!   [`DispatchError::NoActiveSession`] immediately.
//! * [`Coordinator`] - accept loop, handshake, per-session read loop, and the
//!   reaper that evicts sessions gone silent.
//!
//! Acknowledgments are session-level only. They show up as
//! [`CoordinatorEvent::Acknowledged`] and are not correlated with a particular
//! dispatched command; callers needing per-command confirmation embed their
//! own correlation id (for example in `raw_data`).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod link;
pub mod registry;
pub mod server;

pub use config::CoordinatorConfig;
pub use dispatch::{CommandDispatch, CommandSink, Delivery};
pub use error::{CoordinatorError, DispatchError, RegisterError};
pub use events::CoordinatorEvent;
pub use link::AgentLink;
pub use registry::{RegisteredSession, SessionRegistry};
pub use server::Coordinator;
