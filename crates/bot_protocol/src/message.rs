//! Fixed text templates for handshake, heartbeat and acknowledgment frames.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable numeric identity of the game server an agent represents.
pub type TenantId = u64;

const ACK_PREFIX: &str = "ACK";

/// Ephemeral identifier minted for every connection attempt.
///
/// Only used to tell concurrent handshakes from the same tenant apart; it is
/// never persisted and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Mints a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// A text control frame.
///
/// The handshake and the keepalive heartbeat share one shape; which one a
/// `Hello` represents depends on whether it is the first frame of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// `"{tenantId}:{sessionId}"`
    Hello {
        tenant_id: TenantId,
        session_id: SessionId,
    },
    /// `"ACK:{tenantId}:{sessionId}"`
    Ack {
        tenant_id: TenantId,
        session_id: SessionId,
    },
}

impl ControlMessage {
    pub fn hello(tenant_id: TenantId, session_id: SessionId) -> Self {
        ControlMessage::Hello {
            tenant_id,
            session_id,
        }
    }

    pub fn ack(tenant_id: TenantId, session_id: SessionId) -> Self {
        ControlMessage::Ack {
            tenant_id,
            session_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            ControlMessage::Hello { tenant_id, .. } | ControlMessage::Ack { tenant_id, .. } => {
                *tenant_id
            }
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            ControlMessage::Hello { session_id, .. } | ControlMessage::Ack { session_id, .. } => {
                *session_id
            }
        }
    }

    /// Renders the frame payload text.
    pub fn to_text(&self) -> String {
        match self {
            ControlMessage::Hello {
                tenant_id,
                session_id,
            } => format!("{tenant_id}:{session_id}"),
            ControlMessage::Ack {
                tenant_id,
                session_id,
            } => format!("{ACK_PREFIX}:{tenant_id}:{session_id}"),
        }
    }

    /// Interprets a raw frame payload as a control message.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload)?;
        text.parse()
    }
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = || ProtocolError::MalformedControl(text.to_string());

        let (is_ack, rest) = match text.strip_prefix(ACK_PREFIX).and_then(|r| r.strip_prefix(':')) {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (tenant, session) = rest.split_once(':').ok_or_else(malformed)?;
        let tenant_id: TenantId = tenant.parse().map_err(|_| malformed())?;
        let session_id: SessionId = session.parse().map_err(|_| malformed())?;

        Ok(if is_ack {
            ControlMessage::ack(tenant_id, session_id)
        } else {
            ControlMessage::hello(tenant_id, session_id)
        })
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates() {
        let session_id: SessionId = "9f1c2d3e-0000-4000-8000-000000000001".parse().unwrap();

        assert_eq!(
            ControlMessage::hello(42, session_id).to_text(),
            "42:9f1c2d3e-0000-4000-8000-000000000001"
        );
        assert_eq!(
            ControlMessage::ack(42, session_id).to_text(),
            "ACK:42:9f1c2d3e-0000-4000-8000-000000000001"
        );
    }

    #[test]
    fn test_parse_hello_and_ack() {
        let session_id = SessionId::new();

        let hello: ControlMessage = format!("7:{session_id}").parse().unwrap();
        assert_eq!(hello, ControlMessage::hello(7, session_id));

        let ack = ControlMessage::from_payload(format!("ACK:7:{session_id}").as_bytes()).unwrap();
        assert_eq!(ack, ControlMessage::ack(7, session_id));
        assert_eq!(ack.tenant_id(), 7);
        assert_eq!(ack.session_id(), session_id);
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        let session_id = SessionId::new();
        for text in [
            String::new(),
            "42".to_string(),
            format!("abc:{session_id}"),
            "42:not-a-uuid".to_string(),
            format!("ACK:{session_id}"),
            format!("NAK:42:{session_id}"),
        ] {
            assert!(
                matches!(text.parse::<ControlMessage>(), Err(ProtocolError::MalformedControl(_))),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_utf8_payload() {
        let result = ControlMessage::from_payload(&[0xff, 0xfe, 0x3a]);
        assert!(matches!(result, Err(ProtocolError::InvalidText(_))));
    }

    #[test]
    fn test_session_ids_are_fresh() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
