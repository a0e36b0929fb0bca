//! Connection lifecycle state shared by the transport and session layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a ticket's chat connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Created, no connection requested yet.
    #[default]
    Idle,
    /// A socket is being opened.
    Connecting,
    /// The socket is open and can carry outbound frames.
    Open,
    /// Teardown in progress; the socket is being released.
    Closing,
    /// The last attempt failed and a retry is scheduled.
    ClosedRetrying,
    /// The retry budget is exhausted; only an explicit reconnect resumes.
    ClosedFatal,
    /// Torn down by the caller. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether a socket is alive or being established.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::ClosedRetrying => "CLOSED_RETRYING",
            Self::ClosedFatal => "CLOSED_FATAL",
            Self::Closed => "CLOSED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde() {
        for state in [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::ClosedRetrying,
            ConnectionState::ClosedFatal,
            ConnectionState::Closed,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.to_string());
        }
    }

    #[test]
    fn liveness() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Open.is_live());
        assert!(!ConnectionState::ClosedRetrying.is_live());
        assert!(!ConnectionState::ClosedFatal.is_live());
    }
}
