//! Cache invalidation fan-out and single-flight cache population.
//!
//! When a piece of content changes, every cache tier in front of it (an
//! in-process cache, a shared cache like Redis, a CDN edge, the public API
//! response cache) needs to be told. [`CacheCoordinator`] fans an
//! invalidation out to each configured tier on its own thread, the same
//! chunked-thread idiom the orchestrator uses for channel publishes, except
//! here every tier runs concurrently (there's no level ordering) and each
//! gets its own timeout enforced through a channel rather than a blocking
//! `JoinHandle::join`, so one wedged tier can't stall the others.
//!
//! [`SingleFlightCache`] collapses concurrent cache misses for the same key
//! into a single build, mirroring the job-level single-flight lock used by
//! the scheduler but scoped to cache population instead of job submission.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cache tier invalidation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Local,
    Shared,
    Cdn,
    Api,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Shared => "shared",
            Tier::Cdn => "cdn",
            Tier::Api => "api",
        }
    }

    pub fn all() -> &'static [Tier] {
        &[Tier::Local, Tier::Shared, Tier::Cdn, Tier::Api]
    }
}

#[derive(Debug, Clone)]
pub enum TierOutcome {
    Invalidated,
    Timeout,
    Failed(String),
}

/// A backend capable of invalidating a key at one cache tier. Implementors
/// perform the actual network or local-cache call; `CacheCoordinator`
/// handles concurrency and timeouts around it.
pub trait CacheTier: Send + Sync {
    fn invalidate(&self, key: &str) -> Result<(), String>;
}

/// Fans an invalidation out to every registered tier, bounding each tier's
/// contribution to `per_tier_timeout` (5 seconds by default).
pub struct CacheCoordinator {
    tiers: Vec<(Tier, Arc<dyn CacheTier>)>,
    per_tier_timeout: Duration,
}

impl CacheCoordinator {
    pub fn new(per_tier_timeout: Duration) -> Self {
        Self {
            tiers: Vec::new(),
            per_tier_timeout,
        }
    }

    pub fn register(&mut self, tier: Tier, backend: Arc<dyn CacheTier>) {
        self.tiers.push((tier, backend));
    }

    /// Invalidate `key` across every registered tier concurrently. Returns
    /// the per-tier outcome; a tier that doesn't respond within the timeout
    /// is reported as `TierOutcome::Timeout` rather than blocking the whole
    /// call.
    pub fn invalidate_all(&self, key: &str) -> HashMap<Tier, TierOutcome> {
        let mut receivers = Vec::with_capacity(self.tiers.len());

        for (tier, backend) in &self.tiers {
            let (tx, rx) = mpsc::channel();
            let backend = Arc::clone(backend);
            let key = key.to_string();
            std::thread::spawn(move || {
                let outcome = match backend.invalidate(&key) {
                    Ok(()) => TierOutcome::Invalidated,
                    Err(e) => TierOutcome::Failed(e),
                };
                // Receiver may already have timed out and been dropped; that's fine.
                let _ = tx.send(outcome);
            });
            receivers.push((*tier, rx));
        }

        receivers
            .into_iter()
            .map(|(tier, rx)| {
                let outcome = rx
                    .recv_timeout(self.per_tier_timeout)
                    .unwrap_or(TierOutcome::Timeout);
                (tier, outcome)
            })
            .collect()
    }
}

/// Running statistics for a cache, reported via the health/metrics surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub memory_bytes: u64,
    pub oldest_entry_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn oldest_entry_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.oldest_entry_at.map(|ts| now.signed_duration_since(ts))
    }
}

enum Slot<V> {
    Pending,
    Ready(V),
}

struct SharedSlot<V> {
    state: Mutex<Slot<V>>,
    ready: Condvar,
}

/// A cache that collapses concurrent misses on the same key into a single
/// build call. The thread that first misses runs `build`; any thread that
/// misses on the same key while a build is in flight blocks on the result
/// instead of triggering a redundant build.
pub struct SingleFlightCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
    in_flight: Mutex<HashMap<K, Arc<SharedSlot<V>>>>,
    stats: Mutex<CacheStats>,
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Fetch `key`, invoking `build` on a cache miss. Concurrent misses on
    /// the same key share one `build` call.
    pub fn get_or_build(&self, key: K, build: impl FnOnce() -> V) -> V {
        if let Some(value) = self.entries.lock().expect("cache mutex poisoned").get(&key).cloned() {
            self.stats.lock().expect("cache mutex poisoned").hits += 1;
            return value;
        }

        let mut in_flight = self.in_flight.lock().expect("cache mutex poisoned");

        if let Some(slot) = in_flight.get(&key).cloned() {
            drop(in_flight);
            return Self::wait_for_slot(&slot);
        }

        let slot = Arc::new(SharedSlot {
            state: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        });
        in_flight.insert(key.clone(), Arc::clone(&slot));
        drop(in_flight);

        self.stats.lock().expect("cache mutex poisoned").misses += 1;
        let value = build();

        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.clone(), value.clone());

        {
            let mut state = slot.state.lock().expect("cache slot mutex poisoned");
            *state = Slot::Ready(value.clone());
        }
        slot.ready.notify_all();

        self.in_flight.lock().expect("cache mutex poisoned").remove(&key);

        value
    }

    fn wait_for_slot(slot: &Arc<SharedSlot<V>>) -> V {
        let mut state = slot.state.lock().expect("cache slot mutex poisoned");
        loop {
            match &*state {
                Slot::Ready(value) => return value.clone(),
                Slot::Pending => {
                    state = slot.ready.wait(state).expect("cache slot mutex poisoned");
                }
            }
        }
    }

    pub fn invalidate(&self, key: &K) {
        if self.entries.lock().expect("cache mutex poisoned").remove(key).is_some() {
            self.stats.lock().expect("cache mutex poisoned").evictions += 1;
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().expect("cache mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
