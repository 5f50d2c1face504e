//! Circuit breaker (C3): a pure decision object gating connection
//! creation attempts. Owns no timers and performs no I/O — the resilient
//! pool (C5) is its sole caller and polls it before each creation attempt.
//!
//! The state vocabulary (`Closed`/`Open`/`HalfOpen`) follows the shape
//! widely used by resilience layers, reimplemented here as a plain,
//! sans-I/O struct since this crate's pool is a hand-rolled actor rather
//! than a `tower::Service` stack.
//!
//! State transitions emit their own `tracing` events, so they show up in
//! logs as transitions rather than as something the pool has to infer
//! from creation outcomes.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// A non-decreasing sequence of open-period durations: `base, 2*base,
/// 4*base, ..., cap, cap, ...`.
#[derive(Debug, Clone)]
pub struct OpenPeriods {
    base: Duration,
    cap: Duration,
}

impl OpenPeriods {
    pub fn doubling(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// The duration of the `episode`-th (0-indexed) open period.
    pub fn nth(&self, episode: u32) -> Duration {
        let factor = 1u64.checked_shl(episode.min(63)).unwrap_or(u64::MAX);
        let millis = self.base.as_millis().saturating_mul(factor as u128);
        Duration::from_millis(millis.min(self.cap.as_millis()) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until_nanos: u64 },
    HalfOpen { deadline_nanos: u64 },
}

/// Tracks consecutive creation failures and gates new creation attempts
/// behind an exponentially growing open period.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    tolerance: u32,
    open_periods: OpenPeriods,
    half_open_timeout: Duration,
    state: State,
    episode: u32,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(tolerance: u32, open_periods: OpenPeriods, half_open_timeout: Duration) -> Self {
        assert!(tolerance >= 1, "tolerance must be at least 1");
        Self {
            tolerance,
            open_periods,
            half_open_timeout,
            state: State::Closed {
                consecutive_failures: 0,
            },
            episode: 0,
            epoch: Instant::now(),
        }
    }

    pub fn half_open_timeout(&self) -> Duration {
        self.half_open_timeout
    }

    fn nanos_since_epoch(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    fn instant_from_nanos(&self, nanos: u64) -> Instant {
        self.epoch + Duration::from_nanos(nanos)
    }

    /// Returns `true` if a creation attempt may start now, transitioning
    /// `Open -> HalfOpen` when the open period has elapsed. `HalfOpen`
    /// permits exactly one in-flight creation attempt at a time.
    pub fn poll_permit(&mut self, now: Instant) -> bool {
        match self.state {
            State::Closed { .. } => true,
            State::Open { until_nanos } => {
                if self.nanos_since_epoch(now) >= until_nanos {
                    self.state = State::HalfOpen {
                        deadline_nanos: self.nanos_since_epoch(now)
                            + self.half_open_timeout.as_nanos() as u64,
                    };
                    debug!(episode = self.episode, "breaker open -> half-open");
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { .. } => false,
        }
    }

    /// A permitted creation attempt reached `Ready`.
    pub fn on_success(&mut self) {
        if !matches!(self.state, State::Closed { consecutive_failures: 0 }) {
            info!(episode = self.episode, "breaker half-open -> closed");
        }
        self.state = State::Closed {
            consecutive_failures: 0,
        };
        self.episode = 0;
    }

    /// A permitted creation attempt failed or timed out.
    pub fn on_failure(&mut self, now: Instant) {
        match self.state {
            State::Closed {
                consecutive_failures,
            } => {
                let next = consecutive_failures + 1;
                if next >= self.tolerance {
                    self.open(now);
                } else {
                    self.state = State::Closed {
                        consecutive_failures: next,
                    };
                }
            }
            State::Open { .. } | State::HalfOpen { .. } => self.open(now),
        }
    }

    fn open(&mut self, now: Instant) {
        let until = self.nanos_since_epoch(now) + self.open_periods.nth(self.episode).as_nanos() as u64;
        warn!(
            episode = self.episode,
            open_for_ms = self.open_periods.nth(self.episode).as_millis() as u64,
            "breaker -> open"
        );
        self.episode += 1;
        self.state = State::Open { until_nanos: until };
    }

    /// The instant the breaker will next become eligible to permit a
    /// creation attempt, if it is currently withholding one. Used by the
    /// pool to schedule its single wake-up while `Open`.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match self.state {
            State::Closed { .. } => None,
            State::Open { until_nanos } => Some(self.instant_from_nanos(until_nanos)),
            State::HalfOpen { deadline_nanos } => Some(self.instant_from_nanos(deadline_nanos)),
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed { .. })
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }
}
