//! External collaborators: ticket history and user lookup.
//!
//! Both are consumed through traits so sessions can run against fakes. The
//! [`HttpApi`] implementation talks to the marketplace REST API with
//! `reqwest`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use thiserror::Error;
use ticketchat_core::wire::decode_messages;
use ticketchat_core::{TicketId, UserId, WireMessage};
use ticketchat_settings::ServerSettings;
use tracing::{debug, instrument};

/// Errors from a collaborator call.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Ticket metadata returned alongside the history.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TicketMeta {
    /// Ticket identifier.
    pub id: Option<TicketId>,
    /// Ticket subject line.
    pub subject: Option<String>,
    /// Workflow status, e.g. `OPEN` or `RESOLVED`.
    pub status: Option<String>,
    /// Any other fields the server sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Initial history of a ticket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TicketHistory {
    /// Ticket metadata, if the endpoint includes it.
    pub ticket: Option<TicketMeta>,
    /// Messages, unvalidated.
    pub messages: Vec<WireMessage>,
    /// Entries skipped because they could not be decoded.
    pub undecodable: usize,
}

/// Loads the existing conversation of a ticket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetch history. Failure is fatal to opening a session.
    async fn fetch_history(&self, ticket: &TicketId) -> Result<TicketHistory, FetchError>;
}

/// Resolves user IDs to display names.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserResolver: Send + Sync {
    /// Look up display names. IDs the server does not know are omitted.
    async fn resolve_users(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, FetchError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────────────────────────

/// History endpoints answer either `{ticket, messages}` or a bare array.
/// Entries stay raw so each one is decoded on its own.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    Bare(Vec<serde_json::Value>),
    Full {
        #[serde(default)]
        ticket: Option<TicketMeta>,
        #[serde(default)]
        messages: Vec<serde_json::Value>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: UserId,
    #[serde(alias = "name", alias = "username")]
    display_name: String,
}

/// REST client for history and user lookup.
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpApi {
    /// Client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ticketchat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_token,
        })
    }

    /// Client configured from the `server` settings section.
    pub fn from_settings(server: &ServerSettings) -> Result<Self, FetchError> {
        Self::new(
            server.api_base_url.clone(),
            Duration::from_millis(server.request_timeout_ms),
            server.auth_token.clone(),
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HistoryFetcher for HttpApi {
    #[instrument(skip_all, fields(ticket = %ticket))]
    async fn fetch_history(&self, ticket: &TicketId) -> Result<TicketHistory, FetchError> {
        let url = format!(
            "{}/tickets/{}",
            self.base_url,
            utf8_percent_encode(ticket.as_str(), NON_ALPHANUMERIC)
        );
        let (ticket, entries) = match self.get_json::<HistoryBody>(url, &[]).await? {
            HistoryBody::Bare(entries) => (None, entries),
            HistoryBody::Full { ticket, messages } => (ticket, messages),
        };
        let batch = decode_messages(entries);
        debug!(
            messages = batch.messages.len(),
            undecodable = batch.undecodable,
            "history loaded"
        );
        Ok(TicketHistory {
            ticket,
            messages: batch.messages,
            undecodable: batch.undecodable,
        })
    }
}

#[async_trait]
impl UserResolver for HttpApi {
    #[instrument(skip_all, fields(count = ids.len()))]
    async fn resolve_users(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, FetchError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.iter().map(UserId::as_str).collect::<Vec<_>>().join(",");
        let url = format!("{}/users", self.base_url);
        let records: Vec<UserRecord> = self.get_json(url, &[("ids", joined)]).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.id, r.display_name))
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use ticketchat_core::MessageId;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer, token: Option<&str>) -> HttpApi {
        HttpApi::new(
            format!("{}/api/", server.uri()),
            Duration::from_secs(5),
            token.map(String::from),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_history_with_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tickets/42"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ticket": { "id": 42, "subject": "Broken locker", "status": "OPEN", "priority": "HIGH" },
                "messages": [
                    { "id": 1, "ticketId": 42, "authorId": 7, "body": "hello", "timestamp": "2026-03-01T10:00:00Z" },
                    { "id": 2, "authorId": 8, "body": "hi", "timestamp": 1_772_359_260_000_i64 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let history = api(&server, Some("tok"))
            .fetch_history(&TicketId::from(42))
            .await
            .unwrap();
        let meta = history.ticket.unwrap();
        assert_eq!(meta.id, Some(TicketId::from("42")));
        assert_eq!(meta.subject.as_deref(), Some("Broken locker"));
        assert_eq!(meta.extra["priority"], "HIGH");
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[1].ticket_id, None);
    }

    #[tokio::test]
    async fn fetch_history_accepts_bare_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tickets/T%201"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "m1", "authorId": "u1", "body": "x", "timestamp": 0 }
            ])))
            .mount(&server)
            .await;

        let history = api(&server, None)
            .fetch_history(&TicketId::from("T 1"))
            .await
            .unwrap();
        assert!(history.ticket.is_none());
        assert_eq!(history.messages.len(), 1);
    }

    #[tokio::test]
    async fn fetch_history_skips_undecodable_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tickets/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    { "id": 1, "authorId": 7, "body": "first", "timestamp": 1000 },
                    { "id": 2, "authorId": 7, "body": "no offset", "timestamp": "2024-03-01T10:00:00" },
                    { "id": 3, "authorId": 8, "body": "third", "timestamp": 3000 }
                ]
            })))
            .mount(&server)
            .await;

        let history = api(&server, None)
            .fetch_history(&TicketId::from(5))
            .await
            .unwrap();
        let ids: Vec<_> = history
            .messages
            .iter()
            .filter_map(|m| m.id.as_ref().map(MessageId::as_str))
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(history.undecodable, 1);
    }

    #[tokio::test]
    async fn fetch_history_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = api(&server, None)
            .fetch_history(&TicketId::from("9"))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Status { status: 403, .. });
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn fetch_history_rejects_garbage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = api(&server, None)
            .fetch_history(&TicketId::from("9"))
            .await
            .unwrap_err();
        assert_matches!(err, FetchError::Decode(_));
    }

    #[tokio::test]
    async fn resolve_users_joins_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .and(query_param("ids", "7,8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 7, "displayName": "Ada" },
                { "id": "8", "name": "Grace" }
            ])))
            .mount(&server)
            .await;

        let names = api(&server, None)
            .resolve_users(&[UserId::from(7), UserId::from(8)])
            .await
            .unwrap();
        assert_eq!(names[&UserId::from("7")], "Ada");
        assert_eq!(names[&UserId::from("8")], "Grace");
    }

    #[tokio::test]
    async fn resolve_no_ids_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let names = api(&server, None).resolve_users(&[]).await.unwrap();
        assert!(names.is_empty());
    }
}
