//! Branded ID newtypes for type safety.
//!
//! Tickets, messages, and users are identified by opaque values that the
//! backend emits either as JSON strings or as JSON numbers. Each ID type is a
//! newtype over `String` that accepts both shapes on deserialization and
//! always serializes as a string.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Accept a JSON string or integer and normalize it to its string form.
fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the ID is empty or whitespace only.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                flexible_id(deserializer).map(Self)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a support ticket; scopes one chat stream.
    TicketId
}

branded_id! {
    /// Server-assigned identifier of a chat message.
    MessageId
}

branded_id! {
    /// Identifier of a marketplace user (customer or staff).
    UserId
}

branded_id! {
    /// Identifier of one local chat session instance, used to correlate logs.
    SessionId
}

impl SessionId {
    /// Create a new random session ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_from_string() {
        let id: TicketId = serde_json::from_str(r#""T-42""#).unwrap();
        assert_eq!(id.as_str(), "T-42");
    }

    #[test]
    fn deserialize_from_number() {
        let id: MessageId = serde_json::from_str("1017").unwrap();
        assert_eq!(id.as_str(), "1017");
        let neg: UserId = serde_json::from_str("-3").unwrap();
        assert_eq!(neg.as_str(), "-3");
    }

    #[test]
    fn deserialize_rejects_other_shapes() {
        assert!(serde_json::from_str::<TicketId>("true").is_err());
        assert!(serde_json::from_str::<TicketId>("{}").is_err());
        assert!(serde_json::from_str::<TicketId>("1.5").is_err());
    }

    #[test]
    fn number_and_string_ids_compare_equal() {
        let a: MessageId = serde_json::from_str("7").unwrap();
        let b: MessageId = serde_json::from_str(r#""7""#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serializes_as_string() {
        let id = UserId::from(9_u64);
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""9""#);
    }

    #[test]
    fn blank_detection() {
        assert!(TicketId::from("").is_blank());
        assert!(TicketId::from("  \t").is_blank());
        assert!(!TicketId::from("12").is_blank());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn display_and_deref() {
        let id = TicketId::from("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(id.len(), 3);
    }
}
