//! JSON-lines codec for LAN chat protocol messages.
//!
//! Wire format:
//! ```text
//! {"type":"<TAG>","payload":{...}}\n
//! ```
//! One UTF-8 JSON object per line.  The trailing newline is the frame
//! delimiter and is added by [`encode_frame`]; [`decode_frame`] expects a
//! single line with the delimiter already removed (see
//! [`crate::protocol::framing::FrameDecoder`]).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{
    Announcement, AuthFailPayload, AuthMessage, AuthResponsePayload, Envelope, ANNOUNCE,
    AUTH_FAIL, AUTH_REQUEST, AUTH_RESPONSE, AUTH_SUCCESS,
};

/// Errors that can occur during message encoding, decoding, or framing.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The line is not a JSON object with a string `type` field.
    #[error("invalid JSON envelope: {0}")]
    InvalidEnvelope(String),

    /// The `type` tag is not one this decoder understands.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The payload is missing or does not have the required fields.
    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload { kind: String, detail: String },

    /// A value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A frame exceeded the configured maximum length before its delimiter.
    #[error("frame exceeds {limit} bytes without a newline")]
    FrameTooLong { limit: usize },

    /// A complete frame was not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] as one newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use lanchat_core::protocol::{decode_frame, encode_frame, Envelope};
///
/// let bytes = encode_frame(&Envelope::bare("AUTH_REQ")).unwrap();
/// assert_eq!(bytes, b"{\"type\":\"AUTH_REQ\"}\n");
///
/// let line = std::str::from_utf8(&bytes).unwrap().trim_end();
/// assert_eq!(decode_frame(line).unwrap().kind, "AUTH_REQ");
/// ```
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes =
        serde_json::to_vec(envelope).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes a single line (without its trailing newline) into an [`Envelope`].
///
/// Only the envelope structure is checked here; payload validation belongs to
/// the typed decoders such as [`decode_auth_message`].
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidEnvelope`] if the line is not a JSON
/// object with a string `type` field.
pub fn decode_frame(line: &str) -> Result<Envelope, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::InvalidEnvelope(e.to_string()))
}

/// Encodes a handshake message as a newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_auth_message(msg: &AuthMessage) -> Result<Vec<u8>, ProtocolError> {
    encode_frame(&auth_to_envelope(msg)?)
}

/// Decodes one line into a handshake message.
///
/// Structural problems (bad JSON, a non-`AUTH_*` type, a response without a
/// `names` array) are errors.  Semantic checks such as the number of names
/// are **not** made here; the state machine owns those.
///
/// # Errors
///
/// Returns [`ProtocolError`] describing the first structural problem found.
pub fn decode_auth_message(line: &str) -> Result<AuthMessage, ProtocolError> {
    let envelope = decode_frame(line)?;
    auth_from_envelope(&envelope)
}

/// Converts a handshake message into its envelope form.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if a payload cannot be represented as JSON.
pub fn auth_to_envelope(msg: &AuthMessage) -> Result<Envelope, ProtocolError> {
    let envelope = match msg {
        AuthMessage::Request => Envelope::bare(AUTH_REQUEST),
        AuthMessage::Response { names } => Envelope::with_payload(
            AUTH_RESPONSE,
            to_payload(&AuthResponsePayload {
                names: names.clone(),
            })?,
        ),
        AuthMessage::Success => Envelope::bare(AUTH_SUCCESS),
        AuthMessage::Fail { reason } => Envelope::with_payload(
            AUTH_FAIL,
            to_payload(&AuthFailPayload {
                reason: reason.clone(),
            })?,
        ),
    };
    Ok(envelope)
}

/// Interprets an envelope as a handshake message.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownMessageType`] for non-handshake tags and
/// [`ProtocolError::MalformedPayload`] when a required field is missing.
pub fn auth_from_envelope(envelope: &Envelope) -> Result<AuthMessage, ProtocolError> {
    match envelope.kind.as_str() {
        AUTH_REQUEST => Ok(AuthMessage::Request),
        AUTH_RESPONSE => {
            let payload: AuthResponsePayload = from_payload(envelope)?;
            Ok(AuthMessage::Response {
                names: payload.names,
            })
        }
        AUTH_SUCCESS => Ok(AuthMessage::Success),
        AUTH_FAIL => {
            // The reason is optional, so a missing payload is fine.
            if envelope.payload.is_null() {
                return Ok(AuthMessage::Fail { reason: None });
            }
            let payload: AuthFailPayload = from_payload(envelope)?;
            Ok(AuthMessage::Fail {
                reason: payload.reason,
            })
        }
        other => Err(ProtocolError::UnknownMessageType(other.to_string())),
    }
}

/// Serializes any payload struct into a JSON value for an [`Envelope`].
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn to_payload<T: Serialize>(payload: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Deserializes the payload of `envelope` into `T`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] tagged with the envelope type.
pub fn from_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    serde_json::from_value(envelope.payload.clone()).map_err(|e| ProtocolError::MalformedPayload {
        kind: envelope.kind.clone(),
        detail: e.to_string(),
    })
}

/// Encodes a discovery announcement as a single datagram (no newline).
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_announcement(announcement: &Announcement) -> Result<Vec<u8>, ProtocolError> {
    let envelope = Envelope::with_payload(ANNOUNCE, to_payload(announcement)?);
    serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes one discovery datagram.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`], [`ProtocolError::InvalidEnvelope`],
/// [`ProtocolError::UnknownMessageType`] for anything other than `ANNOUNCE`,
/// or [`ProtocolError::MalformedPayload`].
pub fn decode_announcement(datagram: &[u8]) -> Result<Announcement, ProtocolError> {
    let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::InvalidUtf8)?;
    let envelope = decode_frame(text.trim_end())?;
    if envelope.kind != ANNOUNCE {
        return Err(ProtocolError::UnknownMessageType(envelope.kind));
    }
    from_payload(&envelope)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
