//! Ticket-scoped socket abstraction and its `tokio-tungstenite` implementation.
//!
//! A [`Connector`] opens one socket per connection attempt. Every event the
//! socket produces is tagged with the generation it was opened under, so the
//! link can discard events from sockets it has already abandoned.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use ticketchat_core::{ChatError, ConnectionState, Result, TicketId};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Unreserved characters stay as-is in the ticket path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Event produced by one socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketEvent {
    /// Generation the socket was opened under.
    pub generation: u64,
    /// What happened.
    pub kind: SocketEventKind,
}

/// Kind of socket event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEventKind {
    /// Handshake completed; the socket accepts sends.
    Opened,
    /// A text frame (or UTF-8 binary frame) arrived.
    Message(String),
    /// A binary frame that is not valid UTF-8.
    Unreadable(String),
    /// Transport error. The socket is unusable afterwards.
    Error(String),
    /// The peer closed the socket or the stream ended.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Opens ticket-scoped sockets.
pub trait Connector: Send + Sync {
    /// Start opening a socket for `ticket`.
    ///
    /// Returns immediately; progress arrives on `events` tagged with
    /// `generation`. A failed handshake produces a single `Error` event.
    fn open(
        &self,
        ticket: &TicketId,
        generation: u64,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Box<dyn SocketHandle>;
}

/// Handle to one open or opening socket.
pub trait SocketHandle: Send {
    /// Queue a text frame. Fails with `NotConnected` unless the socket is open.
    fn send(&self, payload: String) -> Result<()>;

    /// Close the socket. Idempotent; no events follow a local close.
    fn close(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

#[derive(Clone, Default)]
struct SharedPhase(Arc<AtomicU8>);

impl SharedPhase {
    fn get(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            0 => Phase::Connecting,
            1 => Phase::Open,
            _ => Phase::Closed,
        }
    }

    fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Opens chat sockets against `{base_url}/{ticket}`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    base_url: String,
    auth_token: Option<String>,
}

impl WsConnector {
    /// Connector for the given WebSocket base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` during the handshake.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Full endpoint URL for a ticket.
    pub fn url_for(&self, ticket: &TicketId) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            utf8_percent_encode(ticket.as_str(), PATH_SEGMENT)
        )
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        ticket: &TicketId,
        generation: u64,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Box<dyn SocketHandle> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let phase = SharedPhase::default();

        let url = self.url_for(ticket);
        let auth_token = self.auth_token.clone();
        let task_phase = phase.clone();
        let task_cancel = cancel.clone();
        drop(tokio::spawn(async move {
            run_socket(
                url,
                auth_token,
                generation,
                events,
                out_rx,
                task_phase,
                task_cancel,
            )
            .await;
        }));

        Box::new(WsHandle {
            out_tx,
            cancel,
            phase,
        })
    }
}

struct WsHandle {
    out_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    phase: SharedPhase,
}

impl SocketHandle for WsHandle {
    fn send(&self, payload: String) -> Result<()> {
        let state = match self.phase.get() {
            Phase::Open => ConnectionState::Open,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Closed => ConnectionState::Closed,
        };
        if state != ConnectionState::Open {
            return Err(ChatError::NotConnected { state });
        }
        self.out_tx.send(payload).map_err(|_| ChatError::NotConnected {
            state: ConnectionState::Closed,
        })
    }

    fn close(&self) {
        self.phase.set(Phase::Closed);
        self.cancel.cancel();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn emit(events: &mpsc::UnboundedSender<SocketEvent>, generation: u64, kind: SocketEventKind) {
    // Receiver gone means the link was dropped; nothing left to notify.
    let _ = events.send(SocketEvent { generation, kind });
}

async fn run_socket(
    url: String,
    auth_token: Option<String>,
    generation: u64,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    phase: SharedPhase,
    cancel: CancellationToken,
) {
    let mut request = match url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            phase.set(Phase::Closed);
            emit(&events, generation, SocketEventKind::Error(e.to_string()));
            return;
        }
    };
    if let Some(token) = auth_token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                let _ = request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "auth token is not a valid header value, connecting without it"),
        }
    }

    debug!(%url, generation, "opening socket");
    let ws = tokio::select! {
        () = cancel.cancelled() => return,
        result = connect_async(request) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                phase.set(Phase::Closed);
                emit(&events, generation, SocketEventKind::Error(e.to_string()));
                return;
            }
        },
    };

    if cancel.is_cancelled() {
        return;
    }
    phase.set(Phase::Open);
    emit(&events, generation, SocketEventKind::Opened);

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            payload = out_rx.recv() => {
                let Some(payload) = payload else { break };
                trace!(generation, len = payload.len(), "socket send");
                if let Err(e) = ws_tx.send(Message::text(payload)).await {
                    phase.set(Phase::Closed);
                    emit(&events, generation, SocketEventKind::Error(e.to_string()));
                    break;
                }
            }
            frame = ws_rx.next() => {
                let kind = match frame {
                    Some(Ok(Message::Text(text))) => SocketEventKind::Message(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => SocketEventKind::Message(text),
                        Err(e) => SocketEventKind::Unreadable(e.to_string()),
                    },
                    Some(Ok(Message::Close(frame))) => closed(frame.as_ref()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => SocketEventKind::Error(e.to_string()),
                    None => SocketEventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    },
                };
                let done = matches!(kind, SocketEventKind::Error(_) | SocketEventKind::Closed { .. });
                if done {
                    phase.set(Phase::Closed);
                }
                if !cancel.is_cancelled() {
                    emit(&events, generation, kind);
                }
                if done {
                    break;
                }
            }
        }
    }
    phase.set(Phase::Closed);
    debug!(generation, "socket task finished");
}

fn closed(frame: Option<&CloseFrame>) -> SocketEventKind {
    match frame {
        Some(frame) => SocketEventKind::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        },
        None => SocketEventKind::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
