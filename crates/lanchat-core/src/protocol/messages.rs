//! All LAN chat protocol message types.
//!
//! Every message on the wire is an [`Envelope`]: a JSON object with a
//! `"type"` string and an optional `"payload"` object.
//!
//! ```json
//! {"type":"AUTH_REQ"}
//! {"type":"AUTH_RESP","payload":{"names":["lion","tiger","bear"]}}
//! {"type":"AUTH_SUCCESS"}
//! {"type":"AUTH_FAIL","payload":{"reason":"Names do not match"}}
//! {"type":"CHAT_MESSAGE","payload":{"sender":"alice","text":"hi","timestamp_ms":0}}
//! ```
//!
//! The envelope is kept deliberately loose (`payload` is an arbitrary JSON
//! value) so the connection layer can route a line by its `type` without
//! understanding it.  Typed views such as [`AuthMessage`] are produced by
//! the codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::peer::InstanceId;

// ── Message type tags ─────────────────────────────────────────────────────────

/// Challenge sent by the responder.
pub const AUTH_REQUEST: &str = "AUTH_REQ";
/// The initiator's list of names.
pub const AUTH_RESPONSE: &str = "AUTH_RESP";
/// The responder accepted the names.
pub const AUTH_SUCCESS: &str = "AUTH_SUCCESS";
/// The responder rejected the names.
pub const AUTH_FAIL: &str = "AUTH_FAIL";
/// Chat text exchanged after authentication.
pub const CHAT_MESSAGE: &str = "CHAT_MESSAGE";
/// Discovery broadcast datagram.
pub const ANNOUNCE: &str = "ANNOUNCE";

/// Prefix shared by every handshake message type.
pub const AUTH_PREFIX: &str = "AUTH_";

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The outer JSON object carried by every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag, e.g. `"AUTH_REQ"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body.  Absent (`null`) for message types without a body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Creates an envelope without a payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
        }
    }

    /// Creates an envelope with the given payload value.
    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Returns `true` if this envelope belongs to the authentication handshake.
    pub fn is_auth(&self) -> bool {
        self.kind.starts_with(AUTH_PREFIX)
    }
}

// ── Handshake messages ────────────────────────────────────────────────────────

/// The four messages of the pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMessage {
    /// Responder → initiator: "prove you know the names".
    Request,
    /// Initiator → responder: the names the local human entered.
    Response { names: Vec<String> },
    /// Responder → initiator: names accepted.
    Success,
    /// Responder → initiator: names rejected.
    Fail { reason: Option<String> },
}

impl AuthMessage {
    /// Returns the wire tag for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMessage::Request => AUTH_REQUEST,
            AuthMessage::Response { .. } => AUTH_RESPONSE,
            AuthMessage::Success => AUTH_SUCCESS,
            AuthMessage::Fail { .. } => AUTH_FAIL,
        }
    }
}

/// Payload of `AUTH_RESP`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponsePayload {
    pub names: Vec<String>,
}

/// Payload of `AUTH_FAIL`.  The reason is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── Application messages ──────────────────────────────────────────────────────

/// Payload of `CHAT_MESSAGE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sending node.
    pub sender: String,
    /// The chat text.
    pub text: String,
    /// Milliseconds since the Unix epoch at the sender.
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// Payload of `ANNOUNCE` discovery datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// The announcing node's instance id.
    pub instance_id: InstanceId,
    /// Display name of the announcing node.
    pub name: String,
    /// TCP port the announcing node accepts chat connections on.
    pub port: u16,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
