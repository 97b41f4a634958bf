//! Per-channel circuit breaker.
//!
//! Mirrors the failure-counter idiom used for job state elsewhere in the
//! pipeline (a small struct guarded by a mutex, mutated by compare-and-set
//! rather than a trait-object state machine) but applies it to channel
//! health instead of job persistence.
//!
//! Trip conditions (either one opens the circuit):
//! - 5 or more consecutive failures, or
//! - a failure rate of 50% or higher over the trailing 60 seconds, with at
//!   least 20 samples in that window.
//!
//! An open circuit stays open for a fixed recovery timeout (60s default)
//! before moving to half-open, where a single trial publish is allowed
//! through. Failures while the circuit is open are short-circuited: they do
//! not count as retry attempts and do not feed the failure-rate window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use distro_types::CircuitState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub consecutive_failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub min_samples_for_rate: usize,
    #[serde(with = "humantime_serde")]
    pub rate_window: Duration,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 5,
            failure_rate_threshold: 0.5,
            min_samples_for_rate: 20,
            rate_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit is closed or half-open; the caller should attempt the call.
    Allow,
    /// Circuit is open and the recovery timeout has not elapsed; fail fast
    /// without attempting the call or consuming a retry attempt.
    ShortCircuit,
}

struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    samples: VecDeque<(Instant, bool)>,
    /// Set while a half-open probe call is outstanding so concurrent callers
    /// short-circuit instead of all reaching the backend at once. Cleared by
    /// `record()` once the probe's outcome is known.
    probe_in_flight: bool,
}

impl Inner {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&(ts, _)) = self.samples.front() {
            if now.duration_since(ts) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let failures = self.samples.iter().filter(|(_, ok)| !ok).count();
        Some(failures as f64 / self.samples.len() as f64)
    }
}

/// A circuit breaker for a single channel. Cheap to clone: wrap in `Arc` to
/// share across worker threads.
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::default(),
                opened_at: None,
                samples: VecDeque::new(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    /// Ask whether a call is currently admitted. Transitions `Open` ->
    /// `HalfOpen` in place once the recovery timeout has elapsed. At most one
    /// caller is admitted per half-open window; concurrent callers behind
    /// the first probe short-circuit until `record()` reports its outcome.
    pub fn admit(&self) -> Admission {
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        match guard.state {
            CircuitState::Closed { .. } => Admission::Allow,
            CircuitState::HalfOpen => {
                if guard.probe_in_flight {
                    Admission::ShortCircuit
                } else {
                    guard.probe_in_flight = true;
                    Admission::Allow
                }
            }
            CircuitState::Open => {
                let elapsed = guard
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.probe_in_flight = true;
                    Admission::Allow
                } else {
                    Admission::ShortCircuit
                }
            }
        }
    }

    /// Record the outcome of a call that `admit()` allowed through. Errors
    /// that don't count toward the circuit (`ErrorKind::counts_toward_circuit`
    /// returning false, e.g. a validation failure) should not be reported
    /// here at all.
    pub fn record(&self, success: bool) {
        let now = Instant::now();
        let mut guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        guard.samples.push_back((now, success));
        guard.prune(self.config.rate_window, now);

        match guard.state {
            CircuitState::HalfOpen => {
                guard.probe_in_flight = false;
                if success {
                    guard.state = CircuitState::Closed {
                        consecutive_failures: 0,
                    };
                    guard.opened_at = None;
                } else {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(now);
                }
            }
            CircuitState::Closed { consecutive_failures } => {
                if success {
                    guard.state = CircuitState::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    let failures = consecutive_failures + 1;
                    let rate_tripped = guard.samples.len() >= self.config.min_samples_for_rate
                        && guard.failure_rate().unwrap_or(0.0) >= self.config.failure_rate_threshold;

                    if failures >= self.config.consecutive_failure_threshold || rate_tripped {
                        guard.state = CircuitState::Open;
                        guard.opened_at = Some(now);
                    } else {
                        guard.state = CircuitState::Closed {
                            consecutive_failures: failures,
                        };
                    }
                }
            }
            CircuitState::Open => {
                // Shouldn't normally be reached: admit() gates calls while open.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            consecutive_failure_threshold: 3,
            failure_rate_threshold: 0.5,
            min_samples_for_rate: 4,
            rate_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            assert_eq!(breaker.admit(), Admission::Allow);
            breaker.record(false);
        }
        assert!(matches!(breaker.state(), CircuitState::Open));
        assert_eq!(breaker.admit(), Admission::ShortCircuit);
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record(false);
        breaker.record(false);
        breaker.record(true);
        assert_eq!(
            breaker.state(),
            CircuitState::Closed {
                consecutive_failures: 0
            }
        );
    }

    #[test]
    fn opens_on_failure_rate_with_enough_samples() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record(true);
        breaker.record(false);
        breaker.record(true);
        breaker.record(false);
        // 2/4 failures = 50% with 4 samples, meets threshold and min_samples.
        assert!(matches!(breaker.state(), CircuitState::Open));
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        assert_eq!(breaker.admit(), Admission::ShortCircuit);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(breaker.admit(), Admission::Allow);
        assert!(matches!(breaker.state(), CircuitState::HalfOpen));
    }

    #[test]
    fn half_open_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(breaker.admit(), Admission::Allow);
        breaker.record(false);
        assert!(matches!(breaker.state(), CircuitState::Open));
    }

    #[test]
    fn half_open_admits_only_one_probe_at_a_time() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(breaker.admit(), Admission::Allow, "first probe admitted");
        assert_eq!(breaker.admit(), Admission::ShortCircuit, "second concurrent caller is gated");
        assert_eq!(breaker.admit(), Admission::ShortCircuit, "still gated until the probe reports");

        breaker.record(true);
        assert_eq!(breaker.state(), CircuitState::Closed { consecutive_failures: 0 });
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record(false);
        }
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(breaker.admit(), Admission::Allow);
        breaker.record(true);
        assert_eq!(
            breaker.state(),
            CircuitState::Closed {
                consecutive_failures: 0
            }
        );
    }
}
