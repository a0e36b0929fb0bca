//! Chat message model.
//!
//! Two shapes exist for a message:
//!
//! - [`WireMessage`]: what arrives from the network or the history endpoint.
//!   Every field is optional so that a frame with a missing field still
//!   decodes and can be rejected individually by the reconciler.
//! - [`ChatMessage`]: a validated message with every required field present.
//!   Only these enter a message log.
//!
//! Outbound messages use [`OutgoingMessage`]; the server assigns identity.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{MessageId, TicketId, UserId};

/// A validated chat message belonging to one ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned unique identifier.
    pub id: MessageId,
    /// Ticket this message belongs to.
    pub ticket_id: TicketId,
    /// Author of the message.
    pub author_id: UserId,
    /// Message text; may embed Markdown media references.
    pub body: String,
    /// When the message was authored.
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A message as received on the wire, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Owning ticket; absent on some server frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
    /// Author identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Authoring instant.
    #[serde(
        default,
        deserialize_with = "optional_flexible_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A required field that was absent from a [`WireMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingField {
    /// `id`
    Id,
    /// `ticketId`
    TicketId,
    /// `authorId`
    AuthorId,
    /// `body`
    Body,
    /// `timestamp`
    Timestamp,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Id => "id",
            Self::TicketId => "ticketId",
            Self::AuthorId => "authorId",
            Self::Body => "body",
            Self::Timestamp => "timestamp",
        })
    }
}

impl WireMessage {
    /// Validate into a [`ChatMessage`], reporting the first missing field.
    pub fn into_message(self) -> Result<ChatMessage, MissingField> {
        Ok(ChatMessage {
            id: self.id.ok_or(MissingField::Id)?,
            body: self.body.ok_or(MissingField::Body)?,
            author_id: self.author_id.ok_or(MissingField::AuthorId)?,
            ticket_id: self.ticket_id.ok_or(MissingField::TicketId)?,
            timestamp: self.timestamp.ok_or(MissingField::Timestamp)?,
        })
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(m: ChatMessage) -> Self {
        Self {
            id: Some(m.id),
            ticket_id: Some(m.ticket_id),
            author_id: Some(m.author_id),
            body: Some(m.body),
            timestamp: Some(m.timestamp),
        }
    }
}

/// An outbound frame: the server assigns the message ID on echo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Target ticket.
    pub ticket_id: TicketId,
    /// Sending user.
    pub author_id: UserId,
    /// Composed body (text plus attachment references).
    pub body: String,
    /// Client-stamped send time.
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Attachments
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of an uploaded attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Rendered inline.
    Image,
    /// Rendered as a link.
    File,
}

/// A previously uploaded file referenced from a message body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name.
    pub name: String,
    /// Public URL of the uploaded file.
    pub url: String,
    /// How the reference is rendered.
    pub kind: AttachmentKind,
}

impl Attachment {
    fn markdown(&self) -> String {
        match self.kind {
            AttachmentKind::Image => format!("![{}]({})", self.name, self.url),
            AttachmentKind::File => format!("[{}]({})", self.name, self.url),
        }
    }
}

/// Compose the body of an outbound message.
///
/// The trimmed text comes first, followed by one Markdown reference per
/// attachment on its own line. Returns `None` when there is nothing to send.
pub fn compose_body(text: &str, attachments: &[Attachment]) -> Option<String> {
    let text = text.trim();
    if text.is_empty() && attachments.is_empty() {
        return None;
    }
    let mut lines: Vec<String> = Vec::with_capacity(attachments.len() + 1);
    if !text.is_empty() {
        lines.push(text.to_owned());
    }
    lines.extend(attachments.iter().map(Attachment::markdown));
    Some(lines.join("\n"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp decoding
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

fn resolve_timestamp<E: serde::de::Error>(raw: RawTimestamp) -> Result<DateTime<Utc>, E> {
    match raw {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
        RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| E::custom(format!("invalid timestamp {s:?}: {e}"))),
    }
}

/// Accept RFC 3339 strings or integer epoch milliseconds.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    resolve_timestamp(RawTimestamp::deserialize(deserializer)?)
}

fn optional_flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawTimestamp>::deserialize(deserializer)?
        .map(resolve_timestamp)
        .transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn wire_message_with_numeric_fields() {
        let wire: WireMessage = serde_json::from_value(json!({
            "id": 1, "ticketId": 7, "authorId": 3, "body": "hi", "timestamp": 10
        }))
        .unwrap();
        let msg = wire.into_message().unwrap();
        assert_eq!(msg.id.as_str(), "1");
        assert_eq!(msg.ticket_id.as_str(), "7");
        assert_eq!(msg.timestamp.timestamp_millis(), 10);
    }

    #[test]
    fn wire_message_with_rfc3339_timestamp() {
        let wire: WireMessage = serde_json::from_value(json!({
            "id": "m1", "ticketId": "t1", "authorId": "u1", "body": "hi",
            "timestamp": "2024-03-01T12:00:00+02:00"
        }))
        .unwrap();
        let ts = wire.timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn wire_message_tolerates_missing_fields() {
        let wire: WireMessage = serde_json::from_value(json!({ "body": "orphan" })).unwrap();
        assert!(wire.id.is_none());
        assert_eq!(wire.body.as_deref(), Some("orphan"));
    }

    #[test]
    fn invalid_timestamp_fails_decoding() {
        let result = serde_json::from_value::<WireMessage>(json!({ "timestamp": "yesterday" }));
        assert!(result.is_err());
    }

    #[test]
    fn into_message_reports_missing_field() {
        let wire = WireMessage {
            id: Some("1".into()),
            ticket_id: Some("t".into()),
            author_id: None,
            body: Some("x".into()),
            timestamp: Some(Utc::now()),
        };
        assert_matches!(wire.into_message(), Err(MissingField::AuthorId));
    }

    #[test]
    fn missing_field_display_uses_wire_names() {
        assert_eq!(MissingField::AuthorId.to_string(), "authorId");
        assert_eq!(MissingField::TicketId.to_string(), "ticketId");
    }

    #[test]
    fn outgoing_message_wire_names() {
        let out = OutgoingMessage {
            ticket_id: "t1".into(),
            author_id: "u1".into(),
            body: "hello".into(),
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["ticketId"], "t1");
        assert_eq!(value["authorId"], "u1");
        assert_eq!(value["body"], "hello");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn compose_body_trims_text() {
        assert_eq!(compose_body("  hi there \n", &[]).as_deref(), Some("hi there"));
    }

    #[test]
    fn compose_body_empty_is_none() {
        assert!(compose_body("   ", &[]).is_none());
        assert!(compose_body("", &[]).is_none());
    }

    #[test]
    fn compose_body_with_attachments_only() {
        let atts = vec![
            Attachment {
                name: "receipt.png".into(),
                url: "https://cdn.example/r.png".into(),
                kind: AttachmentKind::Image,
            },
            Attachment {
                name: "invoice.pdf".into(),
                url: "https://cdn.example/i.pdf".into(),
                kind: AttachmentKind::File,
            },
        ];
        let body = compose_body(" ", &atts).unwrap();
        assert_eq!(
            body,
            "![receipt.png](https://cdn.example/r.png)\n[invoice.pdf](https://cdn.example/i.pdf)"
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_attachment() -> impl Strategy<Value = Attachment> {
            ("[a-z]{1,8}\\.png", prop::bool::ANY).prop_map(|(name, image)| Attachment {
                url: format!("https://cdn.example/{name}"),
                name,
                kind: if image {
                    AttachmentKind::Image
                } else {
                    AttachmentKind::File
                },
            })
        }

        proptest! {
            #[test]
            fn compose_body_has_one_line_per_part(
                text in "[ a-z]{0,12}",
                attachments in prop::collection::vec(arb_attachment(), 0..4),
            ) {
                let has_text = !text.trim().is_empty();
                match compose_body(&text, &attachments) {
                    None => prop_assert!(!has_text && attachments.is_empty()),
                    Some(body) => {
                        let lines: Vec<&str> = body.lines().collect();
                        prop_assert_eq!(lines.len(), attachments.len() + usize::from(has_text));
                        if has_text {
                            prop_assert_eq!(lines[0], text.trim());
                        }
                        prop_assert_eq!(body.trim(), body.as_str());
                    }
                }
            }
        }
    }
}
