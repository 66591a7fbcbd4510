//! # Bot Protocol
//!
//! Shared building blocks for the botlink control channel: the length-prefixed
//! frame codec, the serialized writer every outbound frame goes through, the
//! fixed text templates used for handshake/heartbeat/acknowledgment, and the
//! [`Command`] envelope the coordinator pushes to its agents.
//!
//! ## Wire format
//!
//! ```text
//! Frame := uint32_be length || payload[length]      0 < length <= MAX_FRAME_SIZE
//! ```
//!
//! Two payload shapes share the envelope:
//!
//! * **Text** (UTF-8): `"{tenantId}:{sessionId}"` for handshake and heartbeat,
//!   `"ACK:{tenantId}:{sessionId}"` for acknowledgments. See [`ControlMessage`].
//! * **Command** (JSON): coordinator-to-agent instructions. See [`Command`].
//!
//! The codec is shape-agnostic; each side picks an interpretation from the
//! protocol phase it is in.

pub mod activity;
pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod writer;

pub use activity::{current_timestamp_ms, ActivityClock};
pub use codec::{encode, read_frame, MAX_FRAME_SIZE};
pub use command::{Command, CommandItem, CommandKind, Coordinates};
pub use error::{FrameError, ProtocolError};
pub use message::{ControlMessage, SessionId, TenantId};
pub use writer::FrameWriter;
