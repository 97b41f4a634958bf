//! Per-channel token-bucket rate limiting (§4.5).
//!
//! Each channel gets its own bucket, refilled continuously at
//! `rate_per_hour / 3600` tokens/sec up to a cap of `burst` tokens (the
//! channel's batch size). A channel with no tokens available defers the
//! call rather than failing it immediately — the scheduler is responsible
//! for giving up after its own wait budget elapses.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single token bucket. `capacity` doubles as the burst allowance.
pub struct RateBucket {
    inner: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// `rate_per_hour` tokens accrue per hour; `burst` caps how many can be
    /// banked at once (and is the initial fill level).
    pub fn new(rate_per_hour: u64, burst: usize) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            inner: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: rate_per_hour as f64 / 3600.0,
        }
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Attempt to take one token. Returns `true` if the call is allowed to
    /// proceed now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.inner.lock().unwrap();
        self.refill_locked(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long the caller should wait before a token is likely to be
    /// available. Not a guarantee under contention, just a scheduling hint.
    pub fn estimated_wait(&self) -> Duration {
        let mut state = self.inner.lock().unwrap();
        self.refill_locked(&mut state);
        if state.tokens >= 1.0 || self.refill_per_sec <= 0.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - state.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }

    /// Blocks the calling thread until a token is available or `max_wait`
    /// elapses. Returns `true` if a token was acquired.
    pub fn acquire_within(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50).min(max_wait));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_allows_up_to_capacity_immediately() {
        let bucket = RateBucket::new(3600, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn exhausted_bucket_reports_nonzero_wait() {
        let bucket = RateBucket::new(3600, 1);
        assert!(bucket.try_acquire());
        assert!(bucket.estimated_wait() > Duration::ZERO);
    }

    #[test]
    fn acquire_within_gives_up_past_deadline() {
        let bucket = RateBucket::new(1, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.acquire_within(Duration::from_millis(100)));
    }
}
