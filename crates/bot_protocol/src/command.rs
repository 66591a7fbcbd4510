//! Coordinator-to-agent command envelope.
//!
//! Commands are built and owned by the coordinator side. Agents only decode
//! and read them; the business meaning of `kind`, `target` and `value` belongs
//! to whatever consumes the decoded command, not to this crate.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Closed set of instruction kinds an agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Deliver,
    TeleportPlayer,
    Kick,
    Ban,
    Unban,
    Announce,
    Say,
    RunRawCommand,
    DestroyItems,
    ListPlayers,
    /// Tells the agent to drop its connection and reconnect with a new session.
    ReconnectDirective,
}

/// World-space position used by teleport-style instructions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One instruction inside a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandItem {
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

impl CommandItem {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            target: None,
            value: None,
            coordinates: None,
            amount: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// An ordered batch of instructions sent in a single frame.
///
/// `entries` keep insertion order and are never deduplicated. `chained_extra`
/// expresses "do this, then that" compounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default)]
    pub entries: Vec<CommandItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chained_extra: Option<Box<Command>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// A command carrying a single reconnect directive.
    pub fn reconnect() -> Self {
        Self::new().with_entry(CommandItem::new(CommandKind::ReconnectDirective))
    }

    /// A command carrying a single announcement.
    pub fn announce(message: impl Into<String>) -> Self {
        Self::new().with_entry(CommandItem::new(CommandKind::Announce).with_value(message))
    }

    pub fn with_entry(mut self, item: CommandItem) -> Self {
        self.entries.push(item);
        self
    }

    /// Chains `next` to run after this command.
    pub fn then(mut self, next: Command) -> Self {
        self.chained_extra = Some(Box::new(next));
        self
    }

    pub fn with_raw_data(mut self, raw: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    /// True when any top-level entry is a [`CommandKind::ReconnectDirective`].
    pub fn is_reconnect_directive(&self) -> bool {
        self.entries
            .iter()
            .any(|item| item.kind == CommandKind::ReconnectDirective)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
