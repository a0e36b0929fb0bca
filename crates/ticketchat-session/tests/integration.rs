//! End-to-end tests: a real `ChatSession` against an in-process WebSocket
//! chat server and a mocked REST API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticketchat_core::{BackoffPolicy, ChatError, ConnectionState, TicketId, UserId};
use ticketchat_session::{ChatSession, HttpApi, SessionConfig, SessionDeps, SessionEvent};
use ticketchat_transport::WsConnector;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Handshake details recorded by the test server.
#[derive(Clone, Debug)]
struct Handshake {
    path: String,
    authorization: Option<String>,
}

struct ChatServer {
    base_url: String,
    connections: Arc<AtomicUsize>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
}

/// Start a chat server that confirms each subscription and echoes every
/// frame back with a server-assigned id. With `drop_first`, the first
/// connection is cut right after the confirmation.
async fn start_chat_server(drop_first: bool) -> ChatServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let next_id = Arc::new(AtomicU64::new(100));

    let accepted = connections.clone();
    let recorded = handshakes.clone();
    let _ = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let index = accepted.fetch_add(1, Ordering::SeqCst);
            let recorded = recorded.clone();
            let next_id = next_id.clone();
            let _ = tokio::spawn(async move {
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    recorded.lock().push(Handshake {
                        path: req.uri().path().to_string(),
                        authorization: req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from),
                    });
                    Ok(resp)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };
                let hello = json!({ "type": "CONNECTION_ESTABLISHED" }).to_string();
                if ws.send(Message::text(hello)).await.is_err() {
                    return;
                }
                if drop_first && index == 0 {
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let mut value: Value = serde_json::from_str(text.as_str()).unwrap();
                    value["id"] = json!(next_id.fetch_add(1, Ordering::SeqCst));
                    if ws.send(Message::text(value.to_string())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    ChatServer {
        base_url: format!("ws://{addr}/ws/chat"),
        connections,
        handshakes,
    }
}

/// REST API with a one-message history for ticket 7 and a user directory.
async fn start_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tickets/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ticket": { "id": 7, "subject": "Lost parcel", "status": "OPEN" },
            "messages": [
                { "id": 1, "ticketId": 7, "authorId": "agent", "body": "How can I help?", "timestamp": "2026-10-01T09:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "agent", "displayName": "Support Agent" },
            { "id": "student", "displayName": "Sam" }
        ])))
        .mount(&server)
        .await;
    server
}

fn deps(api: &MockServer, ws_base: &str) -> SessionDeps {
    let http = Arc::new(
        HttpApi::new(format!("{}/api", api.uri()), TIMEOUT, Some("tok".into())).unwrap(),
    );
    let connector = WsConnector::new(ws_base).with_auth_token(Some("tok".into()));
    SessionDeps::new(Arc::new(connector), http.clone(), http)
}

fn config(policy: BackoffPolicy) -> SessionConfig {
    SessionConfig {
        reconnect: policy,
        ..SessionConfig::new(UserId::from("student"))
    }
}

fn fast_policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        base_delay_ms: 20,
        max_delay_ms: 80,
        connect_timeout_ms: 2000,
        jitter_factor: 0.0,
    }
}

async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn wait_open(session: &ChatSession) {
    let mut state = session.watch_state();
    timeout(TIMEOUT, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .expect("session never opened")
        .unwrap();
}

#[tokio::test]
async fn round_trip_through_real_socket() {
    let api = start_api().await;
    let server = start_chat_server(false).await;
    let session = ChatSession::open(
        TicketId::from(7),
        config(fast_policy(5)),
        deps(&api, &server.base_url),
    )
    .await
    .unwrap();

    assert_eq!(session.messages().len(), 1);
    assert_eq!(
        session.ticket_meta().and_then(|m| m.subject.as_deref()),
        Some("Lost parcel")
    );

    wait_open(&session).await;
    session.send("Where is my parcel?", &[]).await.unwrap();

    let mut log = session.watch_messages();
    let log = timeout(TIMEOUT, log.wait_for(|l| l.len() == 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(log[1].body, "Where is my parcel?");
    assert_eq!(log[1].id.as_str(), "100");
    assert_eq!(log[1].author_id, UserId::from("student"));

    let handshakes = server.handshakes.lock().clone();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].path, "/ws/chat/7");
    assert_eq!(handshakes[0].authorization.as_deref(), Some("Bearer tok"));

    session.close().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let api = start_api().await;
    let server = start_chat_server(true).await;
    let session = ChatSession::open(
        TicketId::from(7),
        config(fast_policy(5)),
        deps(&api, &server.base_url),
    )
    .await
    .unwrap();
    let mut events = session.subscribe();

    let retry = next_matching(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await;
    assert!(matches!(retry, SessionEvent::Reconnecting { attempt: 1, .. }));
    let _ = next_matching(&mut events, |e| {
        *e == SessionEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);

    session.send("still there?", &[]).await.unwrap();
    let accepted = next_matching(&mut events, |e| matches!(e, SessionEvent::MessagesAccepted(_))).await;
    let SessionEvent::MessagesAccepted(messages) = accepted else {
        unreachable!();
    };
    assert_eq!(messages[0].body, "still there?");
    // History plus one echo; nothing duplicated by the reconnect.
    assert_eq!(session.messages().len(), 2);

    session.close().await;
}

#[tokio::test]
async fn exhausts_against_dead_server() {
    let api = start_api().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("ws://{}/ws/chat", listener.local_addr().unwrap());
    drop(listener);

    let session = ChatSession::open(TicketId::from(7), config(fast_policy(3)), deps(&api, &dead))
        .await
        .unwrap();
    let mut events = session.subscribe();

    let exhausted = next_matching(&mut events, |e| matches!(e, SessionEvent::Exhausted { .. })).await;
    assert_eq!(exhausted, SessionEvent::Exhausted { attempts: 3 });
    assert_eq!(session.state(), ConnectionState::ClosedFatal);

    let err = session.send("anyone?", &[]).await.unwrap_err();
    assert!(matches!(err, ChatError::ReconnectExhausted { attempts: 3 }));
    assert!(err.is_terminal());
    // History survives the failed connection.
    assert_eq!(session.messages().len(), 1);
    session.close().await;
}

#[tokio::test]
async fn history_failure_surfaces_before_connecting() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&api)
        .await;
    let server = start_chat_server(false).await;

    let err = ChatSession::open(TicketId::from(7), config(fast_policy(5)), deps(&api, &server.base_url))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::HistoryLoad { .. }));
    assert!(err.to_string().contains("401"));
    assert_eq!(server.connections.load(Ordering::SeqCst), 0);
}
