//! Reconnect state machine.
//!
//! [`ReconnectSupervisor`] is a pure reducer: it consumes [`SupervisorInput`]s
//! and returns the [`Directive`]s its driver must execute (open or close a
//! socket, arm or cancel timers, emit events). It performs no I/O and reads
//! no clocks, so every transition is unit-testable.
//!
//! ```text
//! IDLE ──connect──▶ CONNECTING ──opened──▶ OPEN
//!                    │  ▲   │                 │
//!          timeout / │  │   │ failed          │ failed / closed
//!          failed    ▼  │   ▼                 ▼
//!              CLOSED_RETRYING ◀──────────────┘
//!                    │ attempt ≥ max
//!                    ▼
//!              CLOSED_FATAL ──manual retry──▶ CONNECTING
//!
//! any ──teardown──▶ CLOSING ──released──▶ CLOSED
//! ```

use std::time::Duration;

use ticketchat_core::{BackoffPolicy, ChatError, ConnectionState, RetryBudget};
use tracing::{debug, error, info};

/// Something that happened to the connection, fed into the reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorInput {
    /// Caller asked for a connection. No-op while one is live.
    Connect,
    /// Caller explicitly retried; resets the budget, leaves `CLOSED_FATAL`.
    ManualRetry,
    /// The current socket opened.
    Opened,
    /// The current socket reported an error.
    Failed {
        /// Transport error description.
        reason: String,
    },
    /// The current socket closed.
    Closed {
        /// WebSocket close code.
        code: u16,
    },
    /// The connect timeout fired before the socket opened.
    ConnectTimedOut,
    /// The backoff timer fired.
    RetryTimerFired,
    /// Caller tears the connection down for good.
    Teardown,
    /// The socket released during teardown is gone.
    Released,
}

/// Observable outcome reported by the supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorReport {
    /// A retry was scheduled after a transient failure.
    Reconnecting {
        /// Failed attempts counted so far (1-based).
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
        /// What went wrong.
        reason: String,
    },
    /// The retry budget ran out.
    Exhausted {
        /// Failed attempts counted against the budget.
        attempts: u32,
    },
}

/// Side effect the driver must perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Open a new socket tagged with `generation`.
    OpenSocket {
        /// Generation the new socket's events must carry.
        generation: u64,
    },
    /// Close the current socket (idempotent).
    CloseSocket,
    /// Start the connect timeout.
    ArmConnectTimeout(Duration),
    /// Stop the connect timeout.
    DisarmConnectTimeout,
    /// Start the single backoff timer.
    ScheduleRetry {
        /// Failed attempts counted so far (1-based).
        attempt: u32,
        /// Delay before reconnecting.
        delay: Duration,
    },
    /// Cancel the pending backoff timer.
    CancelRetry,
    /// Surface a report to the session.
    Report(SupervisorReport),
}

/// Reconnection state machine for one ticket connection.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    state: ConnectionState,
    budget: RetryBudget,
    policy: BackoffPolicy,
    generation: u64,
    retry_pending: bool,
}

impl ReconnectSupervisor {
    /// A supervisor in `IDLE`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            budget: RetryBudget::new(policy.max_attempts),
            policy,
            generation: 0,
            retry_pending: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the current (or most recent) socket.
    ///
    /// Events carrying any other generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current retry budget.
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Backoff policy in effect.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Whether a backoff timer is outstanding.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Apply one input and return the directives to execute, in order.
    pub fn handle(&mut self, input: SupervisorInput) -> Vec<Directive> {
        use ConnectionState as S;
        use SupervisorInput as I;

        let mut out = Vec::new();
        match (self.state, input) {
            (S::Idle | S::ClosedRetrying, I::Connect) => self.start_attempt(&mut out),
            (S::Idle | S::ClosedRetrying | S::ClosedFatal, I::ManualRetry) => {
                self.budget.reset();
                self.start_attempt(&mut out);
            }
            (S::Connecting, I::Opened) => {
                self.state = S::Open;
                self.budget.reset();
                out.push(Directive::DisarmConnectTimeout);
                info!(generation = self.generation, "connection open");
            }
            (S::Connecting, I::ConnectTimedOut) => {
                out.push(Directive::CloseSocket);
                self.fail(ChatError::transient("connect timed out"), &mut out);
            }
            (S::Connecting, I::Failed { reason }) => {
                out.push(Directive::DisarmConnectTimeout);
                out.push(Directive::CloseSocket);
                self.fail(ChatError::transient(reason), &mut out);
            }
            (S::Connecting, I::Closed { code }) => {
                out.push(Directive::DisarmConnectTimeout);
                out.push(Directive::CloseSocket);
                self.fail(
                    ChatError::transient(format!("closed during connect (code {code})")),
                    &mut out,
                );
            }
            (S::Open, I::Failed { reason }) => {
                out.push(Directive::CloseSocket);
                self.fail(ChatError::transient(reason), &mut out);
            }
            (S::Open, I::Closed { code }) => {
                out.push(Directive::CloseSocket);
                self.fail(
                    ChatError::transient(format!("closed by peer (code {code})")),
                    &mut out,
                );
            }
            (S::ClosedRetrying, I::RetryTimerFired) => {
                self.retry_pending = false;
                self.start_attempt(&mut out);
            }
            (S::Closing | S::Closed, I::Teardown) => {}
            (state, I::Teardown) => {
                if self.retry_pending {
                    self.retry_pending = false;
                    out.push(Directive::CancelRetry);
                }
                if state == S::Connecting {
                    out.push(Directive::DisarmConnectTimeout);
                }
                if state.is_live() {
                    self.state = S::Closing;
                    out.push(Directive::CloseSocket);
                } else {
                    self.finish_teardown();
                }
            }
            (S::Closing, I::Released | I::Failed { .. } | I::Closed { .. }) => {
                self.finish_teardown();
            }
            (state, input) => {
                debug!(%state, ?input, "input ignored");
            }
        }
        out
    }

    fn start_attempt(&mut self, out: &mut Vec<Directive>) {
        if self.retry_pending {
            self.retry_pending = false;
            out.push(Directive::CancelRetry);
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        out.push(Directive::OpenSocket {
            generation: self.generation,
        });
        out.push(Directive::ArmConnectTimeout(self.policy.connect_timeout()));
        debug!(
            generation = self.generation,
            attempt = self.budget.attempt,
            "connect attempt"
        );
    }

    fn fail(&mut self, failure: ChatError, out: &mut Vec<Directive>) {
        let prior = self.budget.attempt;
        let attempt = self.budget.record_failure();
        let reason = failure.to_string();
        if self.budget.is_exhausted() {
            self.state = ConnectionState::ClosedFatal;
            error!(attempts = attempt, %reason, "reconnect budget exhausted");
            out.push(Directive::Report(SupervisorReport::Exhausted { attempts: attempt }));
            return;
        }
        let delay = self.policy.delay_for(prior);
        self.state = ConnectionState::ClosedRetrying;
        self.retry_pending = true;
        info!(attempt, delay_ms = delay.as_millis(), %reason, "scheduling reconnect");
        out.push(Directive::ScheduleRetry { attempt, delay });
        out.push(Directive::Report(SupervisorReport::Reconnecting {
            attempt,
            delay,
            reason,
        }));
    }

    fn finish_teardown(&mut self) {
        self.state = ConnectionState::Closed;
        // Bump so events from the released socket are stale.
        self.generation += 1;
        debug!("connection torn down");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ConnectionState as S;
    use SupervisorInput as I;

    fn supervisor() -> ReconnectSupervisor {
        ReconnectSupervisor::new(BackoffPolicy::default())
    }

    fn failed() -> SupervisorInput {
        I::Failed {
            reason: "connection refused".into(),
        }
    }

    fn scheduled_delays(directives: &[Directive]) -> Vec<Duration> {
        directives
            .iter()
            .filter_map(|d| match d {
                Directive::ScheduleRetry { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_from_idle_opens_socket() {
        let mut sup = supervisor();
        let out = sup.handle(I::Connect);
        assert_eq!(sup.state(), S::Connecting);
        assert_eq!(
            out,
            vec![
                Directive::OpenSocket { generation: 1 },
                Directive::ArmConnectTimeout(Duration::from_secs(5)),
            ]
        );
    }

    #[test]
    fn second_connect_while_connecting_is_noop() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let out = sup.handle(I::Connect);
        assert!(out.is_empty());
        assert_eq!(sup.generation(), 1);
    }

    #[test]
    fn connect_while_open_is_noop() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(I::Opened);
        assert!(sup.handle(I::Connect).is_empty());
        assert_eq!(sup.state(), S::Open);
    }

    #[test]
    fn open_resets_budget() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(failed());
        let _ = sup.handle(I::RetryTimerFired);
        assert_eq!(sup.budget().attempt, 1);
        let out = sup.handle(I::Opened);
        assert_eq!(out, vec![Directive::DisarmConnectTimeout]);
        assert_eq!(sup.budget().attempt, 0);
    }

    #[test]
    fn failure_while_open_schedules_retry() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(I::Opened);
        let out = sup.handle(I::Closed { code: 1006 });
        assert_eq!(sup.state(), S::ClosedRetrying);
        assert_eq!(out[0], Directive::CloseSocket);
        assert_eq!(
            out[1],
            Directive::ScheduleRetry {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert_matches!(
            &out[2],
            Directive::Report(SupervisorReport::Reconnecting { attempt: 1, reason, .. })
                if reason == "transient connection failure: closed by peer (code 1006)"
        );
        assert!(sup.retry_pending());
    }

    #[test]
    fn connect_timeout_force_closes_before_retry() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let out = sup.handle(I::ConnectTimedOut);
        assert_eq!(out[0], Directive::CloseSocket);
        assert_matches!(out[1], Directive::ScheduleRetry { attempt: 1, .. });
        assert_eq!(sup.state(), S::ClosedRetrying);
    }

    #[test]
    fn five_failures_end_fatal_without_sixth_attempt() {
        let mut sup = supervisor();
        let mut opens = 0;
        let mut delays = Vec::new();
        let mut out = sup.handle(I::Connect);
        loop {
            opens += out
                .iter()
                .filter(|d| matches!(d, Directive::OpenSocket { .. }))
                .count();
            out = sup.handle(failed());
            delays.extend(scheduled_delays(&out));
            if sup.state() == S::ClosedFatal {
                break;
            }
            out = sup.handle(I::RetryTimerFired);
        }
        assert_eq!(opens, 5);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
            ]
        );
        assert_matches!(
            out.last(),
            Some(Directive::Report(SupervisorReport::Exhausted { attempts: 5 }))
        );
        assert!(!sup.retry_pending());
        // Nothing automatic happens afterwards.
        assert!(sup.handle(I::RetryTimerFired).is_empty());
        assert!(sup.handle(I::Connect).is_empty());
        assert_eq!(sup.state(), S::ClosedFatal);
    }

    #[test]
    fn delays_are_capped() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            ..BackoffPolicy::default()
        };
        let mut sup = ReconnectSupervisor::new(policy);
        let mut delays = Vec::new();
        let _ = sup.handle(I::Connect);
        for _ in 0..9 {
            delays.extend(scheduled_delays(&sup.handle(failed())));
            let _ = sup.handle(I::RetryTimerFired);
        }
        assert_eq!(delays.len(), 9);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(10_000)));
        assert_eq!(delays[4], Duration::from_millis(10_000));
    }

    #[test]
    fn manual_retry_leaves_fatal_with_fresh_budget() {
        let policy = BackoffPolicy {
            max_attempts: 1,
            ..BackoffPolicy::default()
        };
        let mut sup = ReconnectSupervisor::new(policy);
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(failed());
        assert_eq!(sup.state(), S::ClosedFatal);

        let out = sup.handle(I::ManualRetry);
        assert_eq!(sup.state(), S::Connecting);
        assert_eq!(sup.budget().attempt, 0);
        assert_matches!(out[0], Directive::OpenSocket { generation: 2 });
    }

    #[test]
    fn connect_while_retrying_cancels_timer() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(failed());
        let out = sup.handle(I::Connect);
        assert_eq!(out[0], Directive::CancelRetry);
        assert_matches!(out[1], Directive::OpenSocket { generation: 2 });
        assert!(!sup.retry_pending());
    }

    #[test]
    fn teardown_while_open_goes_through_closing() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(I::Opened);
        let out = sup.handle(I::Teardown);
        assert_eq!(out, vec![Directive::CloseSocket]);
        assert_eq!(sup.state(), S::Closing);

        assert!(sup.handle(I::Released).is_empty());
        assert_eq!(sup.state(), S::Closed);
        assert_eq!(sup.generation(), 2);
    }

    #[test]
    fn teardown_while_retrying_cancels_timer() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(failed());
        let out = sup.handle(I::Teardown);
        assert_eq!(out, vec![Directive::CancelRetry]);
        assert_eq!(sup.state(), S::Closed);
    }

    #[test]
    fn teardown_while_connecting_disarms_timeout() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let out = sup.handle(I::Teardown);
        assert_eq!(out, vec![Directive::DisarmConnectTimeout, Directive::CloseSocket]);
    }

    #[test]
    fn closed_is_terminal() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Teardown);
        assert_eq!(sup.state(), S::Closed);
        for input in [
            I::Connect,
            I::ManualRetry,
            I::Opened,
            I::RetryTimerFired,
            I::ConnectTimedOut,
            I::Teardown,
        ] {
            assert!(sup.handle(input).is_empty());
            assert_eq!(sup.state(), S::Closed);
        }
    }

    #[test]
    fn late_close_after_failure_is_ignored() {
        let mut sup = supervisor();
        let _ = sup.handle(I::Connect);
        let _ = sup.handle(failed());
        // Same socket also reports close
        assert!(sup.handle(I::Closed { code: 1006 }).is_empty());
        assert_eq!(sup.budget().attempt, 1);
    }
}
