//! Chat session orchestration.
//!
//! [`ChatSession`] is the handle the UI holds. Each session owns one driver
//! task; every mutation of the message log and the connection happens on
//! that task, in the order events arrive. The handle talks to it over a
//! command channel and observes it through watch and broadcast channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use ticketchat_core::messages::compose_body;
use ticketchat_core::wire::{
    ControlFrame, DecodedBatch, InboundFrame, decode_frame, encode_outgoing,
};
use ticketchat_core::{
    Attachment, BackoffPolicy, ChatError, ChatMessage, ConnectionState, OutgoingMessage, Result,
    SessionId, TicketId, UserId,
};
use ticketchat_settings::{ChatSettings, NotificationSettings};
use ticketchat_transport::{Connector, LinkEvent, SupervisedLink};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::collaborators::{HistoryFetcher, TicketMeta, UserResolver};
use crate::directory::UserDirectory;
use crate::dispatcher::{
    NoopNotifier, NoopScroll, Notifier, ScrollSink, SideEffectDispatcher, StaticVisibility,
    VisibilitySignal,
};
use crate::reconciler::{MessageLog, distinct_authors, merge, scope_to_ticket};

/// Buffered session events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// Per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// The signed-in user; their own messages never notify.
    pub own_user: UserId,
    /// Reconnection policy.
    pub reconnect: BackoffPolicy,
    /// Notification behavior.
    pub notifications: NotificationSettings,
}

impl SessionConfig {
    /// Default policy and notification settings for `own_user`.
    pub fn new(own_user: UserId) -> Self {
        Self {
            own_user,
            reconnect: BackoffPolicy::default(),
            notifications: NotificationSettings::default(),
        }
    }

    /// Configuration taken from loaded settings.
    pub fn from_settings(own_user: UserId, settings: &ChatSettings) -> Self {
        Self {
            own_user,
            reconnect: settings.reconnect.clone(),
            notifications: settings.notifications.clone(),
        }
    }
}

/// Collaborators a session depends on.
#[derive(Clone)]
pub struct SessionDeps {
    /// Opens ticket sockets.
    pub connector: Arc<dyn Connector>,
    /// Loads the initial history.
    pub history: Arc<dyn HistoryFetcher>,
    /// Resolves author display names.
    pub users: Arc<dyn UserResolver>,
    /// Desktop notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Whether the chat is on screen.
    pub visibility: Arc<dyn VisibilitySignal>,
    /// Message list scrolling.
    pub scroll: Arc<dyn ScrollSink>,
    /// Display-name cache, usually shared between sessions.
    pub directory: UserDirectory,
}

impl SessionDeps {
    /// Dependencies with inert UI surfaces and a fresh directory.
    pub fn new(
        connector: Arc<dyn Connector>,
        history: Arc<dyn HistoryFetcher>,
        users: Arc<dyn UserResolver>,
    ) -> Self {
        Self {
            connector,
            history,
            users,
            notifier: Arc::new(NoopNotifier),
            visibility: Arc::new(StaticVisibility(true)),
            scroll: Arc::new(NoopScroll),
            directory: UserDirectory::new(),
        }
    }

    /// Use `notifier` for desktop notifications.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use `visibility` to decide when notifications are redundant.
    #[must_use]
    pub fn with_visibility(mut self, visibility: Arc<dyn VisibilitySignal>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Use `scroll` for scroll-to-bottom requests.
    #[must_use]
    pub fn with_scroll(mut self, scroll: Arc<dyn ScrollSink>) -> Self {
        self.scroll = scroll;
        self
    }

    /// Share `directory` with other sessions.
    #[must_use]
    pub fn with_directory(mut self, directory: UserDirectory) -> Self {
        self.directory = directory;
        self
    }
}

/// Observable session activity, for UI indicators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// New messages entered the log, in timestamp order.
    MessagesAccepted(Vec<ChatMessage>),
    /// A transient failure; the next attempt is scheduled.
    Reconnecting {
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Automatic reconnection gave up. Call [`ChatSession::reconnect`].
    Exhausted {
        /// Failed attempts counted against the budget.
        attempts: u32,
    },
    /// An inbound frame could not be decoded and was dropped.
    PayloadDropped {
        /// Decoder error.
        reason: String,
    },
}

enum Command {
    Send {
        payload: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Reconnect,
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// A live chat on one ticket.
pub struct ChatSession {
    id: SessionId,
    ticket: TicketId,
    own_user: UserId,
    meta: Option<TicketMeta>,
    commands: mpsc::UnboundedSender<Command>,
    log_rx: watch::Receiver<MessageLog>,
    state_rx: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Open a session: load history, seed the log, and start connecting.
    ///
    /// Fails with `InvalidTicket` for a blank ticket and `HistoryLoad` when
    /// the history fetch fails; no socket is opened in either case.
    #[instrument(skip_all, fields(ticket = %ticket))]
    pub async fn open(ticket: TicketId, config: SessionConfig, deps: SessionDeps) -> Result<Self> {
        if ticket.is_blank() {
            return Err(ChatError::InvalidTicket {
                reason: "ticket id is empty".into(),
            });
        }

        let history = deps.history.fetch_history(&ticket).await.map_err(|e| {
            error!(error = %e, "history load failed");
            ChatError::HistoryLoad {
                ticket: ticket.clone(),
                message: e.to_string(),
            }
        })?;

        let id = SessionId::new();
        let (batch, foreign) = scope_to_ticket(history.messages, &ticket);
        let seeded = merge(&MessageLog::default(), batch);
        info!(
            session_id = %id,
            messages = seeded.log.len(),
            dropped = seeded.rejected + foreign + history.undecodable,
            "history loaded"
        );

        let dispatcher = SideEffectDispatcher::new(
            config.own_user.clone(),
            deps.notifier,
            deps.visibility,
            deps.scroll,
            deps.directory.clone(),
            config.notifications,
        );
        let _ = dispatcher.history_loaded(&seeded.log);

        let (log_tx, log_rx) = watch::channel(seeded.log.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut link = SupervisedLink::new(ticket.clone(), deps.connector, config.reconnect);
        let state_rx = link.watch_state();
        link.connect();

        let driver = Driver {
            ticket: ticket.clone(),
            link,
            log: seeded.log,
            log_tx,
            events: events.clone(),
            dispatcher,
            users: deps.users,
            directory: deps.directory,
            commands: commands_rx,
        };
        let span = info_span!("chat_session", session_id = %id, ticket = %ticket);
        let handle = tokio::spawn(
            async move {
                let log = driver.log.clone();
                driver.resolve_authors(&log);
                driver.run().await;
            }
            .instrument(span),
        );

        Ok(Self {
            id,
            ticket,
            own_user: config.own_user,
            meta: history.ticket,
            commands: commands_tx,
            log_rx,
            state_rx,
            events,
            driver: Mutex::new(Some(handle)),
        })
    }

    /// Session identifier, for correlating logs.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Ticket this session is scoped to.
    pub fn ticket(&self) -> &TicketId {
        &self.ticket
    }

    /// Ticket metadata from the history fetch, if the server sent any.
    pub fn ticket_meta(&self) -> Option<&TicketMeta> {
        self.meta.as_ref()
    }

    /// Current log snapshot.
    pub fn messages(&self) -> MessageLog {
        self.log_rx.borrow().clone()
    }

    /// Receiver that observes every accepted merge.
    pub fn watch_messages(&self) -> watch::Receiver<MessageLog> {
        self.log_rx.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send a message.
    ///
    /// The message only appears in the log once the server echoes it back.
    /// Fails with `NotConnected` unless the connection is `OPEN`, or with
    /// `ReconnectExhausted` once automatic reconnection has given up.
    #[instrument(skip_all, fields(session_id = %self.id, ticket = %self.ticket))]
    pub async fn send(&self, text: &str, attachments: &[Attachment]) -> Result<()> {
        if self.commands.is_closed() {
            return Err(ChatError::SessionClosed);
        }
        let body = compose_body(text, attachments).ok_or(ChatError::EmptyMessage)?;
        let payload = encode_outgoing(&OutgoingMessage {
            ticket_id: self.ticket.clone(),
            author_id: self.own_user.clone(),
            body,
            timestamp: Utc::now(),
        })?;
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Send { payload, reply })
            .map_err(|_| ChatError::SessionClosed)?;
        result.await.map_err(|_| ChatError::SessionClosed)?
    }

    /// Retry connecting after the session gave up. Resets the retry budget.
    pub fn reconnect(&self) -> Result<()> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| ChatError::SessionClosed)
    }

    /// Tear the session down. Safe to call repeatedly.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(session_id = %self.id, error = %e, "session driver ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("ticket", &self.ticket)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

struct Driver {
    ticket: TicketId,
    link: SupervisedLink,
    log: MessageLog,
    log_tx: watch::Sender<MessageLog>,
    events: broadcast::Sender<SessionEvent>,
    dispatcher: SideEffectDispatcher,
    users: Arc<dyn UserResolver>,
    directory: UserDirectory,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        debug!("session driver started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send { payload, reply }) => {
                        let _ = reply.send(self.link.send(payload));
                    }
                    Some(Command::Reconnect) => {
                        info!("manual reconnect requested");
                        self.link.reconnect();
                    }
                    Some(Command::Close { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                event = self.link.next_event() => self.on_link_event(event),
            }
        }
        debug!("session driver stopped");
    }

    fn shutdown(&mut self) {
        self.link.teardown();
        for event in self.link.take_pending() {
            self.on_link_event(event);
        }
        self.log = MessageLog::default();
        let _ = self.log_tx.send_replace(self.log.clone());
        info!("session closed");
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => self.emit(SessionEvent::StateChanged(state)),
            LinkEvent::Frame(raw) => self.on_frame(&raw),
            LinkEvent::Unreadable(reason) => {
                warn!(%reason, "dropping unreadable frame");
                self.emit(SessionEvent::PayloadDropped { reason });
            }
            LinkEvent::Reconnecting { attempt, delay, .. } => {
                self.emit(SessionEvent::Reconnecting { attempt, delay });
            }
            LinkEvent::Exhausted { attempts } => {
                self.emit(SessionEvent::Exhausted { attempts });
            }
        }
    }

    fn on_frame(&mut self, raw: &str) {
        match decode_frame(raw) {
            Ok(InboundFrame::Messages(batch)) => self.apply_batch(batch),
            Ok(InboundFrame::Control(ControlFrame::ConnectionEstablished)) => {
                debug!("server confirmed subscription");
            }
            Ok(InboundFrame::Control(ControlFrame::Other(kind))) => {
                debug!(%kind, "ignoring control frame");
            }
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping malformed frame");
                self.emit(SessionEvent::PayloadDropped {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn apply_batch(&mut self, batch: DecodedBatch) {
        let (messages, foreign) = scope_to_ticket(batch.messages, &self.ticket);
        let outcome = merge(&self.log, messages);
        let dropped = batch.undecodable + foreign + outcome.rejected;
        if dropped > 0 {
            debug!(dropped, kept = outcome.accepted.len(), "batch entries dropped");
        }
        if !outcome.changed {
            return;
        }
        self.log = outcome.log;
        let _ = self.log_tx.send_replace(self.log.clone());
        let _ = self.dispatcher.dispatch(&outcome.accepted);
        self.resolve_authors(&outcome.accepted);
        self.emit(SessionEvent::MessagesAccepted(outcome.accepted));
    }

    /// Look up display names for unseen authors in the background.
    fn resolve_authors(&self, messages: &[ChatMessage]) {
        let authors = distinct_authors(messages);
        let unknown = self.directory.unknown(&authors);
        if unknown.is_empty() {
            return;
        }
        let users = Arc::clone(&self.users);
        let directory = self.directory.clone();
        let _ = tokio::spawn(
            async move {
                match users.resolve_users(&unknown).await {
                    Ok(names) => {
                        debug!(requested = unknown.len(), resolved = names.len(), "display names resolved");
                        directory.extend(names);
                    }
                    Err(e) => warn!(error = %e, "user resolution failed"),
                }
            }
            .in_current_span(),
        );
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
