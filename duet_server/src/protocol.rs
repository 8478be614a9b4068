//! Wire protocol: identifiers, roles and the JSON messages exchanged with
//! participants.
//!
//! Every frame is a JSON object tagged by `type`. The relay never looks
//! inside `payload`.

use crate::error::{ClientRequestError, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Longest accepted session identifier
const MAX_SESSION_ID_LEN: usize = 64;

/// Length of a server-generated session identifier
const GENERATED_SESSION_ID_LEN: usize = 6;

/// Session identifier, always upper-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    /// Normalize a client-supplied identifier.
    ///
    /// Returns `None` when the trimmed value is empty, too long, or contains
    /// anything but ASCII alphanumerics, `-` and `_`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_SESSION_ID_LEN {
            return None;
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    /// Random short identifier
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..GENERATED_SESSION_ID_LEN].to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ephemeral participant identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ParticipantId(pub uuid::Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for ParticipantId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Informational label chosen by the client at connect time
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
    #[default]
    Guest,
}

impl Role {
    /// Unknown or missing labels fall back to [`Role::Guest`]
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("caller") => Role::Caller,
            Some("callee") => Role::Callee,
            _ => Role::Guest,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Caller => "caller",
            Role::Callee => "callee",
            Role::Guest => "guest",
        })
    }
}

/// Negotiation message kinds the relay forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Ice,
}

/// Envelope added around a relayed payload.
///
/// The payload keeps the exact JSON text the sender wrote.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relayed {
    pub session_id: SessionId,
    pub from: ParticipantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

/// Messages produced by the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        session_id: SessionId,
        participant_id: ParticipantId,
        role: Role,
        created_at: i64,
        members: Vec<ParticipantId>,
    },
    #[serde(rename = "member.joined", rename_all = "camelCase")]
    MemberJoined {
        session_id: SessionId,
        participant_id: ParticipantId,
        role: Role,
    },
    #[serde(rename = "member.left", rename_all = "camelCase")]
    MemberLeft {
        session_id: SessionId,
        participant_id: ParticipantId,
    },
    #[serde(rename = "offer")]
    Offer(Relayed),
    #[serde(rename = "answer")]
    Answer(Relayed),
    #[serde(rename = "ice")]
    Ice(Relayed),
    #[serde(rename = "pong")]
    Pong { t: i64 },
    #[serde(rename = "ping")]
    Ping { t: i64 },
    #[serde(rename = "error")]
    Error { code: ErrorCode },
}

impl ServerMessage {
    pub fn relayed(kind: RelayKind, envelope: Relayed) -> Self {
        match kind {
            RelayKind::Offer => ServerMessage::Offer(envelope),
            RelayKind::Answer => ServerMessage::Answer(envelope),
            RelayKind::Ice => ServerMessage::Ice(envelope),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize into a shareable text frame; `None` if serialization fails
    pub fn to_frame(&self) -> Option<Arc<str>> {
        match self.to_json() {
            Ok(json) => Some(Arc::from(json)),
            Err(e) => {
                warn!(error = %e, "failed to serialize server message");
                None
            }
        }
    }
}

/// Decoded inbound message
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Relay {
        kind: RelayKind,
        payload: Option<Box<RawValue>>,
    },
    Ping,
}

/// Top-level fields of an inbound frame, left undecoded
type RawFields = HashMap<String, Box<RawValue>>;

fn take_field(fields: &mut RawFields, name: &str) -> Option<Box<RawValue>> {
    fields.remove(name).filter(|raw| raw.get() != "null")
}

/// Decode a text frame.
///
/// Only `type` is interpreted; `payload` is carried as the raw JSON text.
/// `Ok(None)` means the frame carried no `type` and is dropped silently.
pub fn parse_client_message(text: &str) -> Result<Option<ClientMessage>, ClientRequestError> {
    // A map never accepts arrays or scalars, so those fail as bad_json
    let mut fields: RawFields = serde_json::from_str(text)?;
    let Some(kind) = take_field(&mut fields, "type") else {
        return Ok(None);
    };
    let kind: String = serde_json::from_str(kind.get())?;
    let payload = take_field(&mut fields, "payload");

    let message = match kind.as_str() {
        "offer" => ClientMessage::Relay {
            kind: RelayKind::Offer,
            payload,
        },
        "answer" => ClientMessage::Relay {
            kind: RelayKind::Answer,
            payload,
        },
        "ice" => ClientMessage::Relay {
            kind: RelayKind::Ice,
            payload,
        },
        "ping" => ClientMessage::Ping,
        _ => return Err(ClientRequestError::UnsupportedType(kind)),
    };
    Ok(Some(message))
}

/// Server clock in Unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
