// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::CircuitState;

/// How a guarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    /// A failure of a kind the breaker counts.
    Failure,
    /// A failure the breaker does not count, or a call that never finished.
    Neutral,
}

/// Proof that a call was admitted, remembered until the call finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    epoch: u64,
    probe: bool,
}

impl Ticket {
    pub fn is_probe(self) -> bool {
        self.probe
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnterResult {
    Accepted { ticket: Ticket, half_opened: bool },
    Rejected { retry_after: Duration },
}

/// State change caused by a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    Opened { consecutive_failures: u32 },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open,
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    // Incremented on every trip; results of calls admitted in an earlier epoch are ignored.
    epoch: u64,
}

/// The consecutive-failure state machine of one circuit breaker.
///
/// All reads and writes of the state happen under a single lock that is never held across
/// an `.await`.
#[derive(Debug)]
pub(crate) struct Engine {
    state: Mutex<State>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Engine {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Closed,
                consecutive_failures: 0,
                last_failure: None,
                epoch: 0,
            }),
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn enter(&self, now: Instant) -> EnterResult {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        let phase = state.phase;

        match phase {
            Phase::Closed => EnterResult::Accepted {
                ticket: Ticket { epoch, probe: false },
                half_opened: false,
            },
            Phase::Open => {
                let opened_at = state.last_failure.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);

                if elapsed >= self.recovery_timeout {
                    state.phase = Phase::HalfOpen { probe_in_flight: true };
                    EnterResult::Accepted {
                        ticket: Ticket { epoch, probe: true },
                        half_opened: true,
                    }
                } else {
                    EnterResult::Rejected {
                        retry_after: self.recovery_timeout.saturating_sub(elapsed),
                    }
                }
            }
            Phase::HalfOpen { probe_in_flight: true } => EnterResult::Rejected {
                retry_after: Duration::ZERO,
            },
            Phase::HalfOpen { probe_in_flight: false } => {
                state.phase = Phase::HalfOpen { probe_in_flight: true };
                EnterResult::Accepted {
                    ticket: Ticket { epoch, probe: true },
                    half_opened: false,
                }
            }
        }
    }

    pub fn exit(&self, ticket: Ticket, outcome: Outcome, now: Instant) -> Transition {
        let mut state = self.state.lock();

        // Calls admitted before the last trip finish into a state that no longer concerns them.
        if ticket.epoch != state.epoch {
            return Transition::Unchanged;
        }

        let phase = state.phase;

        match (phase, outcome) {
            (Phase::Closed, Outcome::Success) => {
                state.consecutive_failures = 0;
                Transition::Unchanged
            }
            (Phase::Closed, Outcome::Failure) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_failure = Some(now);

                if state.consecutive_failures >= self.failure_threshold {
                    state.trip();
                    Transition::Opened {
                        consecutive_failures: state.consecutive_failures,
                    }
                } else {
                    Transition::Unchanged
                }
            }
            (Phase::HalfOpen { .. }, Outcome::Success) if ticket.probe => {
                state.phase = Phase::Closed;
                state.consecutive_failures = 0;
                Transition::Closed
            }
            (Phase::HalfOpen { .. }, Outcome::Failure) if ticket.probe => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_failure = Some(now);
                state.trip();
                Transition::Opened {
                    consecutive_failures: state.consecutive_failures,
                }
            }
            (Phase::HalfOpen { .. }, Outcome::Neutral) if ticket.probe => {
                state.phase = Phase::HalfOpen { probe_in_flight: false };
                Transition::Unchanged
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock();

        EngineSnapshot {
            state: match state.phase {
                Phase::Closed => CircuitState::Closed,
                Phase::Open => CircuitState::Open,
                Phase::HalfOpen { .. } => CircuitState::HalfOpen,
            },
            consecutive_failures: state.consecutive_failures,
            last_failure: state.last_failure,
        }
    }
}

impl State {
    fn trip(&mut self) {
        self.phase = Phase::Open;
        self.epoch = self.epoch.wrapping_add(1);
    }
}
