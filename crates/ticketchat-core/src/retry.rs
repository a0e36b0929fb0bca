//! Reconnect backoff configuration and retry budget.
//!
//! Sync-only building blocks; the async timers that consume them live in
//! `ticketchat-transport`.
//!
//! - [`BackoffPolicy`]: attempts, base delay, cap, connect timeout, jitter
//! - [`RetryBudget`]: attempt counter that gives up at `max_attempts`
//! - [`calculate_backoff_delay`]: `min(base * 2^attempt, cap)`

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Reconnection policy for one chat session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Consecutive failures tolerated before `CLOSED_FATAL`.
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in ms.
    pub max_delay_ms: u64,
    /// How long a connect attempt may stall before it is force-closed.
    pub connect_timeout_ms: u64,
    /// Jitter factor 0.0–1.0 (0 disables jitter).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnecting after the failure at zero-based `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }

    /// Like [`delay_for`](Self::delay_for) with jitter drawn from `random` in `[0, 1)`.
    ///
    /// The jittered value never exceeds the cap.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32, random: f64) -> Duration {
        let ms = calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        );
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Exponential backoff: `min(max_delay_ms, base_delay_ms * 2^attempt)`.
///
/// Saturates instead of overflowing for large attempt numbers.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// Backoff with symmetric jitter.
///
/// Maps `random` in `[0, 1)` to a multiplier in `[1 - jitter, 1 + jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry budget
// ─────────────────────────────────────────────────────────────────────────────

/// Counts consecutive failed connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    /// Failures since the last successful open.
    pub attempt: u32,
    /// Failures tolerated before giving up.
    pub max_attempts: u32,
}

impl RetryBudget {
    /// A fresh budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    /// Record one failure and return the new attempt count.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Reset after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Whether the session must give up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
