//! Ticket chat wire protocol.
//!
//! Inbound frames are UTF-8 JSON and take one of three shapes:
//!
//! - a single message object
//! - an array of message objects
//! - a control object carrying a `type` field and no `id`, such as
//!   `{ "type": "CONNECTION_ESTABLISHED" }`
//!
//! Outbound frames are a single [`OutgoingMessage`] object.

use serde_json::Value;
use tracing::warn;

use crate::errors::{ChatError, Result};
use crate::messages::{OutgoingMessage, WireMessage};

/// Control type sent by the server right after the socket opens.
pub const CONNECTION_ESTABLISHED: &str = "CONNECTION_ESTABLISHED";

/// A server control message. Never merged into the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    /// The server accepted the subscription.
    ConnectionEstablished,
    /// Any other control type; ignored.
    Other(String),
}

/// Messages decoded from a frame or a history body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Decoded entries, in receive order.
    pub messages: Vec<WireMessage>,
    /// Entries skipped because they could not be decoded.
    pub undecodable: usize,
}

impl From<Vec<WireMessage>> for DecodedBatch {
    fn from(messages: Vec<WireMessage>) -> Self {
        Self {
            messages,
            undecodable: 0,
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Control message.
    Control(ControlFrame),
    /// One or more chat messages, in receive order.
    Messages(DecodedBatch),
}

/// Decode one inbound text frame.
///
/// Missing message fields are not a decoding error: they surface as `None`
/// and are rejected per entry by the reconciler. Inside an array, an element
/// that is not an object or has a mistyped field is skipped on its own and
/// its siblings are kept. Invalid JSON, a scalar frame, or a single
/// undecodable object fails the whole frame.
pub fn decode_frame(raw: &str) -> Result<InboundFrame> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ChatError::malformed(format!("invalid JSON: {e}")))?;

    match value {
        Value::Array(items) => Ok(InboundFrame::Messages(decode_messages(items))),
        Value::Object(ref map) if map.contains_key("type") && !map.contains_key("id") => {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
            Ok(InboundFrame::Control(if kind == CONNECTION_ESTABLISHED {
                ControlFrame::ConnectionEstablished
            } else {
                ControlFrame::Other(kind.to_owned())
            }))
        }
        Value::Object(_) => Ok(InboundFrame::Messages(vec![decode_message(value, None)?].into())),
        other => Err(ChatError::malformed(format!(
            "expected object or array, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decode a list of message entries one at a time.
///
/// Entries that fail are logged and counted in
/// [`DecodedBatch::undecodable`]; the rest keep their order.
pub fn decode_messages(items: impl IntoIterator<Item = Value>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for (index, item) in items.into_iter().enumerate() {
        match decode_message(item, Some(index)) {
            Ok(message) => batch.messages.push(message),
            Err(e) => {
                batch.undecodable += 1;
                warn!(index, error = %e, "skipping undecodable message");
            }
        }
    }
    batch
}

fn decode_message(value: Value, index: Option<usize>) -> Result<WireMessage> {
    if !value.is_object() {
        return Err(ChatError::malformed(format!(
            "element {} is {}, expected object",
            index.unwrap_or_default(),
            json_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| match index {
        Some(i) => ChatError::malformed(format!("element {i}: {e}")),
        None => ChatError::malformed(e.to_string()),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Encode an outbound frame.
pub fn encode_outgoing(message: &OutgoingMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
