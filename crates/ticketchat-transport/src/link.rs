//! Supervised link: one ticket connection kept alive by the supervisor.
//!
//! [`SupervisedLink`] executes the directives produced by
//! [`ReconnectSupervisor`]: it owns the live socket, the connect-timeout and
//! backoff deadlines, and the socket event channel. Callers drive it by
//! awaiting [`SupervisedLink::next_event`] in their own `select!` loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ticketchat_core::{BackoffPolicy, ChatError, ConnectionState, Result, TicketId};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::socket::{Connector, SocketEvent, SocketEventKind, SocketHandle};
use crate::supervisor::{Directive, ReconnectSupervisor, SupervisorInput, SupervisorReport};

/// Event surfaced to the owner of the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A text frame arrived on the current socket.
    Frame(String),
    /// A frame arrived that is not text.
    Unreadable(String),
    /// A retry is scheduled.
    Reconnecting {
        /// Failed attempts counted so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
        /// What went wrong.
        reason: String,
    },
    /// Automatic reconnection gave up.
    Exhausted {
        /// Failed attempts counted against the budget.
        attempts: u32,
    },
}

/// A ticket connection with automatic reconnection.
pub struct SupervisedLink {
    ticket: TicketId,
    connector: Arc<dyn Connector>,
    supervisor: ReconnectSupervisor,
    socket: Option<Box<dyn SocketHandle>>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: mpsc::UnboundedReceiver<SocketEvent>,
    connect_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
    pending: VecDeque<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl SupervisedLink {
    /// A link in `IDLE`. Nothing is opened until [`connect`](Self::connect).
    pub fn new(ticket: TicketId, connector: Arc<dyn Connector>, policy: BackoffPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            ticket,
            connector,
            supervisor: ReconnectSupervisor::new(policy),
            socket: None,
            events_tx,
            events_rx,
            connect_deadline: None,
            retry_deadline: None,
            pending: VecDeque::new(),
            state_tx,
        }
    }

    /// Ticket this link is scoped to.
    pub fn ticket(&self) -> &TicketId {
        &self.ticket
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start connecting. No-op while a connection is live or after giving up.
    pub fn connect(&mut self) {
        self.apply(SupervisorInput::Connect);
    }

    /// Explicit retry: resets the budget and connects, even from `CLOSED_FATAL`.
    pub fn reconnect(&mut self) {
        self.apply(SupervisorInput::ManualRetry);
    }

    /// Send a text frame on the open socket.
    ///
    /// Fails with `ReconnectExhausted` after giving up and `NotConnected` in
    /// every other state that is not `OPEN`.
    pub fn send(&self, payload: String) -> Result<()> {
        let state = self.state();
        match (&self.socket, state) {
            (Some(socket), ConnectionState::Open) => socket.send(payload),
            (_, ConnectionState::ClosedFatal) => Err(ChatError::ReconnectExhausted {
                attempts: self.supervisor.budget().attempt,
            }),
            _ => Err(ChatError::NotConnected { state }),
        }
    }

    /// Close the socket and cancel every timer. The link ends in `CLOSED`.
    pub fn teardown(&mut self) {
        self.apply(SupervisorInput::Teardown);
        if self.state() == ConnectionState::Closing {
            // The socket handle is released synchronously by CloseSocket.
            self.apply(SupervisorInput::Released);
        }
    }

    /// Drain events queued by synchronous calls without waiting.
    pub fn take_pending(&mut self) -> Vec<LinkEvent> {
        self.pending.drain(..).collect()
    }

    /// Wait for the next link event.
    ///
    /// Cancel-safe: dropping the future loses no events and fires no timer
    /// twice, so it can sit in a `select!` next to other sources.
    pub async fn next_event(&mut self) -> LinkEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            tokio::select! {
                event = self.events_rx.recv() => {
                    // The link holds a sender, so the channel never closes.
                    let Some(event) = event else { continue };
                    self.on_socket_event(event);
                }
                () = wait_for(self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.apply(SupervisorInput::ConnectTimedOut);
                }
                () = wait_for(self.retry_deadline) => {
                    self.retry_deadline = None;
                    self.apply(SupervisorInput::RetryTimerFired);
                }
            }
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        if event.generation != self.supervisor.generation() {
            trace!(
                generation = event.generation,
                current = self.supervisor.generation(),
                "stale socket event dropped"
            );
            return;
        }
        match event.kind {
            SocketEventKind::Opened => self.apply(SupervisorInput::Opened),
            SocketEventKind::Message(text) => {
                if self.state() == ConnectionState::Open {
                    self.pending.push_back(LinkEvent::Frame(text));
                }
            }
            SocketEventKind::Unreadable(reason) => {
                self.pending.push_back(LinkEvent::Unreadable(reason));
            }
            SocketEventKind::Error(reason) => {
                self.apply(SupervisorInput::Failed { reason });
            }
            SocketEventKind::Closed { code, reason } => {
                debug!(code, %reason, "socket closed");
                self.apply(SupervisorInput::Closed { code });
            }
        }
    }

    fn apply(&mut self, input: SupervisorInput) {
        let before = self.supervisor.state();
        let directives = self.supervisor.handle(input);
        let after = self.supervisor.state();
        if before != after {
            let _ = self.state_tx.send_replace(after);
            self.pending.push_back(LinkEvent::StateChanged(after));
        }

        let mut scheduled = None;
        for directive in directives {
            match directive {
                Directive::OpenSocket { generation } => {
                    if let Some(old) = self.socket.take() {
                        old.close();
                    }
                    let events = self.events_tx.clone();
                    self.socket = Some(self.connector.open(&self.ticket, generation, events));
                }
                Directive::CloseSocket => {
                    if let Some(socket) = self.socket.take() {
                        socket.close();
                    }
                }
                Directive::ArmConnectTimeout(timeout) => {
                    self.connect_deadline = Some(Instant::now() + timeout);
                }
                Directive::DisarmConnectTimeout => self.connect_deadline = None,
                Directive::ScheduleRetry { attempt, delay } => {
                    let delay = self.jittered(attempt, delay);
                    scheduled = Some(delay);
                    self.retry_deadline = Some(Instant::now() + delay);
                }
                Directive::CancelRetry => self.retry_deadline = None,
                Directive::Report(SupervisorReport::Reconnecting {
                    attempt,
                    delay,
                    reason,
                }) => {
                    self.pending.push_back(LinkEvent::Reconnecting {
                        attempt,
                        delay: scheduled.unwrap_or(delay),
                        reason,
                    });
                }
                Directive::Report(SupervisorReport::Exhausted { attempts }) => {
                    warn!(ticket = %self.ticket, attempts, "giving up on reconnect");
                    self.pending.push_back(LinkEvent::Exhausted { attempts });
                }
            }
        }
    }

    fn jittered(&self, attempt: u32, delay: Duration) -> Duration {
        let policy = self.supervisor.policy();
        if policy.jitter_factor > 0.0 {
            policy.jittered_delay_for(attempt.saturating_sub(1), rand::random::<f64>())
        } else {
            delay
        }
    }
}

impl Drop for SupervisedLink {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
