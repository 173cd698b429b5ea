//! Per-tool circuit breaker.
//!
//! ```text
//!   Closed ──(N failures in window | persistent slow calls)──► Open
//!     ▲                                                         │
//!     │ trial succeeds                          reset timeout   │
//!     │                                         elapses         ▼
//!     └──────────────────────────── Half-Open ◄─────────────────┘
//!                                      │ trial fails
//!                                      └──────────────► Open (timer restarts)
//! ```
//!
//! Half-Open admits exactly one trial call. Time is read from
//! `tokio::time::Instant` and passed in explicitly so transitions can be
//! driven deterministically.

use crate::tools::health::HealthStatus;
use crate::types::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// The health view exposed to status readers.
    pub fn health(self) -> HealthStatus {
        match self {
            BreakerState::Closed => HealthStatus::Ready,
            BreakerState::HalfOpen => HealthStatus::Degraded,
            BreakerState::Open => HealthStatus::Offline,
        }
    }
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Ordinary call while Closed.
    Normal,
    /// The single Half-Open trial call.
    Trial,
}

/// A state change, reported so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    /// Failure timestamps inside the trailing window (Closed only).
    failures: VecDeque<Instant>,
    /// Consecutive successful-but-slow calls.
    slow_calls: usize,
    reset_deadline: Option<Instant>,
    trial_started: Option<Instant>,
    last_latency: Option<Duration>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            slow_calls: 0,
            reset_deadline: None,
            trial_started: None,
            last_latency: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn health(&self) -> HealthStatus {
        self.state.health()
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// Failures currently counted in the trailing window.
    pub fn failure_count(&self, now: Instant) -> usize {
        self.failures
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < self.config.failure_window)
            .count()
    }

    /// Time left before an Open breaker admits a trial call.
    pub fn retry_after(&self, now: Instant) -> Duration {
        match (self.state, self.reset_deadline) {
            (BreakerState::Open, Some(deadline)) => deadline.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Ask to place a call. `Err` carries the remaining open time.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(Admission, Option<Transition>), Duration> {
        match self.state {
            BreakerState::Closed => Ok((Admission::Normal, None)),
            BreakerState::Open => {
                let deadline = self.reset_deadline.unwrap_or(now);
                if now < deadline {
                    return Err(deadline - now);
                }
                let transition = self.move_to(BreakerState::HalfOpen);
                self.trial_started = Some(now);
                Ok((Admission::Trial, transition))
            }
            BreakerState::HalfOpen => {
                // A trial that never reported back (caller dropped) is
                // reclaimed after one reset period.
                match self.trial_started {
                    Some(started)
                        if now.saturating_duration_since(started) < self.config.reset_timeout =>
                    {
                        Err(self.config.reset_timeout - now.saturating_duration_since(started))
                    }
                    _ => {
                        self.trial_started = Some(now);
                        Ok((Admission::Trial, None))
                    }
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(
        &mut self,
        admission: Admission,
        now: Instant,
        latency: Duration,
    ) -> Option<Transition> {
        self.last_latency = Some(latency);
        match (admission, self.state) {
            (Admission::Trial, BreakerState::HalfOpen) => {
                self.clear_counters();
                self.move_to(BreakerState::Closed)
            }
            (Admission::Normal, BreakerState::Closed) => {
                self.failures.clear();
                if latency > self.config.latency_threshold {
                    self.slow_calls += 1;
                    if self.slow_calls >= self.config.slow_call_limit {
                        return self.trip(now);
                    }
                } else {
                    self.slow_calls = 0;
                }
                None
            }
            // Late results from calls admitted under an earlier state.
            _ => None,
        }
    }

    /// Record a failed call.
    pub fn record_failure(
        &mut self,
        admission: Admission,
        now: Instant,
        latency: Option<Duration>,
    ) -> Option<Transition> {
        if latency.is_some() {
            self.last_latency = latency;
        }
        match (admission, self.state) {
            (Admission::Trial, BreakerState::HalfOpen) => self.trip(now),
            (Admission::Normal, BreakerState::Closed) => {
                self.prune(now);
                self.failures.push_back(now);
                if self.failures.len() >= self.config.failure_threshold {
                    self.trip(now)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Give back a trial whose outcome says nothing about the tool's
    /// health. The next caller may take the trial straight away.
    pub fn release(&mut self, admission: Admission) {
        if admission == Admission::Trial && self.state == BreakerState::HalfOpen {
            self.trial_started = None;
        }
    }

    /// Force the breaker back to Closed with clean counters.
    pub fn reset(&mut self) -> Option<Transition> {
        self.clear_counters();
        self.move_to(BreakerState::Closed)
    }

    fn trip(&mut self, now: Instant) -> Option<Transition> {
        self.clear_counters();
        self.reset_deadline = Some(now + self.config.reset_timeout);
        self.move_to(BreakerState::Open)
    }

    fn clear_counters(&mut self) {
        self.failures.clear();
        self.slow_calls = 0;
        self.trial_started = None;
        self.reset_deadline = None;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&at) = self.failures.front() {
            if now.saturating_duration_since(at) >= self.config.failure_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn move_to(&mut self, to: BreakerState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        (from != to).then_some(Transition { from, to })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(20);

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            latency_threshold: Duration::from_secs(5),
            slow_call_limit: 3,
            reset_timeout: Duration::from_secs(60),
        })
    }

    fn fail_n(b: &mut CircuitBreaker, now: Instant, n: usize) {
        for _ in 0..n {
            let (admission, _) = b.try_acquire(now).unwrap();
            b.record_failure(admission, now, Some(FAST));
        }
    }

    #[test]
    fn test_starts_closed_and_ready() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.health(), HealthStatus::Ready);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut b = breaker();
        let now = Instant::now();
        fail_n(&mut b, now, 4);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(now), 4);

        let (admission, _) = b.try_acquire(now).unwrap();
        let transition = b.record_failure(admission, now, None);
        assert_eq!(
            transition,
            Some(Transition {
                from: BreakerState::Closed,
                to: BreakerState::Open
            })
        );
        assert_eq!(b.health(), HealthStatus::Offline);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut b = breaker();
        let now = Instant::now();
        fail_n(&mut b, now, 4);
        let (admission, _) = b.try_acquire(now).unwrap();
        b.record_success(admission, now, FAST);
        assert_eq!(b.failure_count(now), 0);

        fail_n(&mut b, now, 4);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failures_outside_window_expire() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 4);
        let later = start + Duration::from_secs(61);
        fail_n(&mut b, later, 1);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(later), 1);
    }

    #[test]
    fn test_open_rejects_until_reset_timeout() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);

        let retry = b.try_acquire(start + Duration::from_secs(10)).unwrap_err();
        assert_eq!(retry, Duration::from_secs(50));
        assert_eq!(b.retry_after(start + Duration::from_secs(10)), Duration::from_secs(50));

        let (admission, transition) = b.try_acquire(start + Duration::from_secs(60)).unwrap();
        assert_eq!(admission, Admission::Trial);
        assert_eq!(transition.map(|t| t.to), Some(BreakerState::HalfOpen));
        assert_eq!(b.health(), HealthStatus::Degraded);
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);
        let after = start + Duration::from_secs(60);

        assert!(b.try_acquire(after).is_ok());
        assert!(b.try_acquire(after).is_err());
        assert!(b.try_acquire(after + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_trial_success_closes() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);
        let after = start + Duration::from_secs(60);
        let (admission, _) = b.try_acquire(after).unwrap();
        b.record_success(admission, after, FAST);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(after), 0);
    }

    #[test]
    fn test_trial_failure_reopens_with_new_timer() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);
        let after = start + Duration::from_secs(60);
        let (admission, _) = b.try_acquire(after).unwrap();
        b.record_failure(admission, after, None);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.retry_after(after), Duration::from_secs(60));
        assert!(b.try_acquire(after + Duration::from_secs(59)).is_err());
        assert!(b.try_acquire(after + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_abandoned_trial_reclaimed() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);
        let after = start + Duration::from_secs(60);
        assert!(b.try_acquire(after).is_ok());
        // No outcome recorded; a full reset period later another trial is allowed.
        let (admission, _) = b.try_acquire(after + Duration::from_secs(60)).unwrap();
        assert_eq!(admission, Admission::Trial);
    }

    #[test]
    fn test_persistent_latency_opens() {
        let mut b = breaker();
        let now = Instant::now();
        let slow = Duration::from_secs(6);
        for _ in 0..2 {
            let (admission, _) = b.try_acquire(now).unwrap();
            b.record_success(admission, now, slow);
        }
        assert_eq!(b.state(), BreakerState::Closed);
        let (admission, _) = b.try_acquire(now).unwrap();
        b.record_success(admission, now, slow);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.last_latency(), Some(slow));
    }

    #[test]
    fn test_fast_call_breaks_slow_streak() {
        let mut b = breaker();
        let now = Instant::now();
        let slow = Duration::from_secs(6);
        for latency in [slow, slow, FAST, slow, slow] {
            let (admission, _) = b.try_acquire(now).unwrap();
            b.record_success(admission, now, latency);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_late_normal_result_ignored_while_open() {
        let mut b = breaker();
        let now = Instant::now();
        fail_n(&mut b, now, 5);
        assert!(b.record_success(Admission::Normal, now, FAST).is_none());
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_reset() {
        let mut b = breaker();
        let now = Instant::now();
        fail_n(&mut b, now, 5);
        b.reset();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire(now).is_ok());
    }

    #[test]
    fn test_released_trial_frees_slot_without_transition() {
        let mut b = breaker();
        let start = Instant::now();
        fail_n(&mut b, start, 5);
        let after = start + Duration::from_secs(60);

        let (admission, _) = b.try_acquire(after).unwrap();
        assert_eq!(admission, Admission::Trial);
        assert!(b.try_acquire(after).is_err());

        b.release(admission);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        let (again, _) = b.try_acquire(after).unwrap();
        assert_eq!(again, Admission::Trial);
    }

    #[test]
    fn test_release_of_normal_admission_is_noop() {
        let mut b = breaker();
        let now = Instant::now();
        fail_n(&mut b, now, 2);
        b.release(Admission::Normal);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(now), 2);
    }
}
