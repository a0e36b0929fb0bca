//! Error hierarchy for ticket chat.
//!
//! [`ChatError`] covers every failure the chat layer knows about. Only a
//! subset crosses the public session boundary: input validation
//! (`InvalidTicket`, `EmptyMessage`), rejected sends (`NotConnected`), and
//! terminal session states (`ReconnectExhausted`, `HistoryLoad`,
//! `SessionClosed`). Every transport-level failure is classified as
//! `TransientConnection`, counted against the retry budget and never
//! surfaced on its own; running out of budget becomes `ReconnectExhausted`.

use thiserror::Error;

use crate::connection::ConnectionState;
use crate::ids::TicketId;

/// Errors produced by the chat transport and session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A send was attempted while the connection was not open.
    #[error("not connected (connection is {state})")]
    NotConnected {
        /// State at the time of the attempt.
        state: ConnectionState,
    },

    /// The ticket identifier cannot scope a chat stream.
    #[error("invalid ticket: {reason}")]
    InvalidTicket {
        /// Why the ticket was rejected.
        reason: String,
    },

    /// Nothing to send after trimming text and attachments.
    #[error("message is empty")]
    EmptyMessage,

    /// A network-level error, close, or connect timeout.
    #[error("transient connection failure: {message}")]
    TransientConnection {
        /// Description from the underlying transport.
        message: String,
    },

    /// The retry budget ran out. Returned for sends until an explicit
    /// reconnect.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Failed attempts counted against the budget.
        attempts: u32,
    },

    /// A single inbound frame could not be decoded.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Decoder error.
        reason: String,
    },

    /// The initial history fetch failed.
    #[error("failed to load history for ticket {ticket}: {message}")]
    HistoryLoad {
        /// Ticket being opened.
        ticket: TicketId,
        /// Collaborator error.
        message: String,
    },

    /// The session was closed and no longer accepts commands.
    #[error("session is closed")]
    SessionClosed,

    /// Outbound frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ChatError {
    /// Shorthand for a transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientConnection {
            message: message.into(),
        }
    }

    /// Shorthand for a malformed payload.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::InvalidTicket { .. } => "INVALID_TICKET",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::TransientConnection { .. } => "TRANSIENT_CONNECTION",
            Self::ReconnectExhausted { .. } => "RECONNECT_EXHAUSTED",
            Self::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            Self::HistoryLoad { .. } => "HISTORY_LOAD",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::Encode(_) => "ENCODE",
        }
    }

    /// Whether the session needs explicit user action to recover.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted { .. } | Self::HistoryLoad { .. } | Self::SessionClosed
        )
    }
}

/// Result alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
