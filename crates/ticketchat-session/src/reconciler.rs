//! Message reconciliation.
//!
//! [`merge`] folds a batch of wire messages into a [`MessageLog`]. It is pure
//! and idempotent: merging the same batch twice changes nothing the second
//! time. The log it returns is always non-decreasing by timestamp and unique
//! by message ID.
//!
//! Duplicates are collapsed, never patched. A second copy of a message with
//! an edited body is dropped; the first copy wins.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use ticketchat_core::{ChatMessage, MessageId, TicketId, UserId, WireMessage};
use tracing::{trace, warn};

/// Ordered, de-duplicated message log.
///
/// Cloning is cheap; a clone is a read-only snapshot that later merges
/// never touch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageLog(Arc<Vec<ChatMessage>>);

impl MessageLog {
    /// Messages in timestamp order.
    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.0
    }

    /// Distinct author IDs, in first-seen order.
    pub fn authors(&self) -> Vec<UserId> {
        distinct_authors(&self.0)
    }
}

impl Deref for MessageLog {
    type Target = [ChatMessage];

    fn deref(&self) -> &[ChatMessage] {
        &self.0
    }
}

/// Result of a [`merge`].
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// The merged log. Shares storage with the input when nothing changed.
    pub log: MessageLog,
    /// Whether any message was accepted.
    pub changed: bool,
    /// Newly accepted messages, in timestamp order.
    pub accepted: Vec<ChatMessage>,
    /// Entries dropped for missing required fields.
    pub rejected: usize,
}

/// Merge `batch` into `current`.
///
/// Entries missing a required field are logged and skipped. Only IDs not
/// already in `current` (or earlier in the same batch) are accepted. The
/// result is stably sorted by timestamp, so equal timestamps keep their
/// receive order.
pub fn merge(current: &MessageLog, batch: impl IntoIterator<Item = WireMessage>) -> MergeOutcome {
    let mut seen: HashSet<MessageId> = current.iter().map(|m| m.id.clone()).collect();
    let mut accepted = Vec::new();
    let mut rejected = 0;

    for wire in batch {
        let hint = wire.id.clone();
        match wire.into_message() {
            Ok(message) => {
                if seen.insert(message.id.clone()) {
                    accepted.push(message);
                } else {
                    trace!(id = %message.id, "duplicate message skipped");
                }
            }
            Err(missing) => {
                rejected += 1;
                warn!(
                    id = hint.as_ref().map_or("<none>", MessageId::as_str),
                    field = %missing,
                    "rejecting message with missing field"
                );
            }
        }
    }

    if accepted.is_empty() {
        return MergeOutcome {
            log: current.clone(),
            changed: false,
            accepted,
            rejected,
        };
    }

    accepted.sort_by_key(|m| m.timestamp);
    let mut messages = Vec::with_capacity(current.len() + accepted.len());
    messages.extend_from_slice(current);
    messages.extend(accepted.iter().cloned());
    messages.sort_by_key(|m| m.timestamp);

    MergeOutcome {
        log: MessageLog(Arc::new(messages)),
        changed: true,
        accepted,
        rejected,
    }
}

/// Scope a batch to one ticket.
///
/// Entries without a ticket ID are stamped with `ticket`; entries for any
/// other ticket are dropped. Returns the kept entries and the drop count.
pub fn scope_to_ticket(
    batch: impl IntoIterator<Item = WireMessage>,
    ticket: &TicketId,
) -> (Vec<WireMessage>, usize) {
    let mut foreign = 0;
    let kept = batch
        .into_iter()
        .filter_map(|mut wire| {
            match wire.ticket_id.take() {
                None => {
                    wire.ticket_id = Some(ticket.clone());
                    Some(wire)
                }
                Some(other) if &other == ticket => {
                    wire.ticket_id = Some(other);
                    Some(wire)
                }
                Some(other) => {
                    foreign += 1;
                    warn!(%ticket, %other, "dropping message for another ticket");
                    None
                }
            }
        })
        .collect();
    (kept, foreign)
}

/// Distinct author IDs of `messages`, in first-seen order.
pub fn distinct_authors(messages: &[ChatMessage]) -> Vec<UserId> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter(|m| seen.insert(&m.author_id))
        .map(|m| m.author_id.clone())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
