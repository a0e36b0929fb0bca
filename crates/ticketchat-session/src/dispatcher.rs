//! Side effects for newly accepted messages.
//!
//! [`SideEffectDispatcher`] decides, per merge batch, whether to raise
//! notifications and issues at most one scroll-to-bottom. The UI surfaces it
//! talks to are injected as traits so the decisions are testable headless.

use std::sync::Arc;

use ticketchat_core::{ChatMessage, MessageId, TicketId, UserId};
use ticketchat_settings::NotificationSettings;
use tracing::{debug, trace};

use crate::directory::UserDirectory;

/// A desktop notification for one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Author display name, or the fallback label while unresolved.
    pub title: String,
    /// Truncated body preview.
    pub body: String,
    /// Ticket to focus when clicked.
    pub ticket_id: TicketId,
    /// Message the notification is about.
    pub message_id: MessageId,
}

/// Desktop notification capability.
///
/// Implementations must degrade silently when notifications are
/// unavailable. A clicked notification focuses the chat window for
/// [`Notification::ticket_id`] and dismisses itself.
pub trait Notifier: Send + Sync {
    /// Whether the user granted notification permission.
    fn permission_granted(&self) -> bool;

    /// Show a notification.
    fn raise(&self, notification: Notification);
}

/// Whether the chat is currently visible to the user.
pub trait VisibilitySignal: Send + Sync {
    /// Read synchronously at dispatch time.
    fn is_visible(&self) -> bool;
}

/// Scroll target for the message list.
pub trait ScrollSink: Send + Sync {
    /// Scroll to the newest message.
    fn scroll_to_bottom(&self);
}

/// Notifier for environments without notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn permission_granted(&self) -> bool {
        false
    }

    fn raise(&self, _notification: Notification) {}
}

/// Fixed visibility answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticVisibility(pub bool);

impl VisibilitySignal for StaticVisibility {
    fn is_visible(&self) -> bool {
        self.0
    }
}

/// Scroll sink that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScroll;

impl ScrollSink for NoopScroll {
    fn scroll_to_bottom(&self) {}
}

/// What one dispatch did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Notifications raised.
    pub notified: usize,
    /// Whether a scroll was issued.
    pub scrolled: bool,
}

/// Notification and scroll decisions for one session.
pub struct SideEffectDispatcher {
    own_user: UserId,
    notifier: Arc<dyn Notifier>,
    visibility: Arc<dyn VisibilitySignal>,
    scroll: Arc<dyn ScrollSink>,
    directory: UserDirectory,
    settings: NotificationSettings,
}

impl SideEffectDispatcher {
    /// Dispatcher acting on behalf of `own_user`.
    pub fn new(
        own_user: UserId,
        notifier: Arc<dyn Notifier>,
        visibility: Arc<dyn VisibilitySignal>,
        scroll: Arc<dyn ScrollSink>,
        directory: UserDirectory,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            own_user,
            notifier,
            visibility,
            scroll,
            directory,
            settings,
        }
    }

    /// React to messages accepted by one live merge.
    pub fn dispatch(&self, accepted: &[ChatMessage]) -> DispatchReport {
        if accepted.is_empty() {
            return DispatchReport::default();
        }
        self.scroll.scroll_to_bottom();

        let mut notified = 0;
        for message in accepted {
            if message.author_id == self.own_user {
                trace!(id = %message.id, "own message, no notification");
                continue;
            }
            if !self.settings.enabled || self.visibility.is_visible() {
                continue;
            }
            if !self.notifier.permission_granted() {
                trace!("notification permission not granted");
                continue;
            }
            self.notifier.raise(self.notification_for(message));
            notified += 1;
        }
        debug!(accepted = accepted.len(), notified, "dispatched side effects");
        DispatchReport {
            notified,
            scrolled: true,
        }
    }

    /// React to the initial history load: scroll only, never notify.
    pub fn history_loaded(&self, messages: &[ChatMessage]) -> DispatchReport {
        if messages.is_empty() {
            return DispatchReport::default();
        }
        self.scroll.scroll_to_bottom();
        DispatchReport {
            notified: 0,
            scrolled: true,
        }
    }

    fn notification_for(&self, message: &ChatMessage) -> Notification {
        Notification {
            title: self
                .directory
                .display_name(&message.author_id)
                .unwrap_or_else(|| self.settings.fallback_title.clone()),
            body: preview(&message.body, self.settings.preview_chars),
            ticket_id: message.ticket_id.clone(),
            message_id: message.id.clone(),
        }
    }
}

/// Single-line preview of at most `max_chars` characters.
///
/// Whitespace runs collapse to one space; an ellipsis marks truncation.
pub fn preview(body: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
