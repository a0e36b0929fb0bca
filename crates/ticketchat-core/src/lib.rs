//! # ticketchat-core
//!
//! Foundation types shared by every ticket chat crate:
//!
//! - **Branded IDs**: `TicketId`, `MessageId`, `UserId`, `SessionId` as newtypes
//! - **Messages**: [`ChatMessage`], the lenient [`WireMessage`], and outbound frames
//! - **Wire codec**: [`wire::decode_frame`] / [`wire::encode_outgoing`]
//! - **Connection state**: [`ConnectionState`] shared by transport and session
//! - **Backoff**: [`BackoffPolicy`] and [`RetryBudget`]
//! - **Errors**: [`ChatError`] hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod retry;
pub mod wire;

pub use connection::ConnectionState;
pub use errors::{ChatError, Result};
pub use ids::{MessageId, SessionId, TicketId, UserId};
pub use messages::{Attachment, AttachmentKind, ChatMessage, MissingField, OutgoingMessage, WireMessage};
pub use retry::{BackoffPolicy, RetryBudget};
pub use wire::DecodedBatch;
