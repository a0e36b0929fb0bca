//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use ticketchat_core::BackoffPolicy;

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Backend endpoints.
    pub server: ServerSettings,
    /// Reconnection policy applied to every chat session.
    pub reconnect: BackoffPolicy,
    /// Desktop notification behavior.
    pub notifications: NotificationSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            reconnect: BackoffPolicy::default(),
            notifications: NotificationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ChatSettings {
    /// Reject values that cannot drive a session.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reconnect;
        if r.max_attempts == 0 {
            return Err(SettingsError::invalid("reconnect.maxAttempts", "must be at least 1"));
        }
        if r.base_delay_ms == 0 || r.base_delay_ms > r.max_delay_ms {
            return Err(SettingsError::invalid(
                "reconnect.baseDelayMs",
                format!("{} is outside 1..={}", r.base_delay_ms, r.max_delay_ms),
            ));
        }
        if r.connect_timeout_ms == 0 {
            return Err(SettingsError::invalid("reconnect.connectTimeoutMs", "must be positive"));
        }
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(SettingsError::invalid(
                "reconnect.jitterFactor",
                format!("{} is outside 0.0..=1.0", r.jitter_factor),
            ));
        }
        if self.notifications.preview_chars == 0 {
            return Err(SettingsError::invalid(
                "notifications.previewChars",
                "must be at least 1",
            ));
        }
        for (key, url, schemes) in [
            ("server.apiBaseUrl", &self.server.api_base_url, ["http://", "https://"]),
            ("server.wsBaseUrl", &self.server.ws_base_url, ["ws://", "wss://"]),
        ] {
            if !schemes.iter().any(|s| url.starts_with(s)) {
                return Err(SettingsError::invalid(
                    key,
                    format!("{url} must start with {} or {}", schemes[0], schemes[1]),
                ));
            }
        }
        Ok(())
    }
}

/// Backend endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base URL of the REST API (history and user lookup).
    pub api_base_url: String,
    /// Base URL of the chat WebSocket endpoint; the ticket ID is appended.
    pub ws_base_url: String,
    /// Timeout for REST calls in milliseconds.
    pub request_timeout_ms: u64,
    /// Bearer token forwarded to REST and WebSocket endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            ws_base_url: "ws://localhost:8080/ws/chat".to_string(),
            request_timeout_ms: 15_000,
            auth_token: None,
        }
    }
}

/// Desktop notification behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Master switch; when off the permission query always answers "denied".
    pub enabled: bool,
    /// Maximum characters of the body shown in a notification.
    pub preview_chars: usize,
    /// Title used while the author's display name is unresolved.
    pub fallback_title: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            preview_chars: 80,
            fallback_title: "New message".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
