use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;

use crate::error::{LibError, Result};

/// Per-route ceiling over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_requests: usize,
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub const fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Storage seam for rate-limit state. The in-memory implementation is
/// the only one shipped; a multi-process deployment swaps this for a
/// shared external store without touching call sites.
pub trait RateStore: Send + Sync {
    fn record(&self, key: &str, policy: RatePolicy, now: Instant) -> RateDecision;
    fn sweep(&self, now: Instant);
}

struct ClientWindow {
    stamps: VecDeque<Instant>,
    window: Duration,
}

/// Sliding-window counters keyed by client identity. State lives in
/// process memory and resets on restart; this is a soft abuse
/// deterrent, not a correctness guarantee.
pub struct MemoryRateStore {
    entries: Mutex<HashMap<String, ClientWindow>>,
    max_tracked_clients: usize,
}

impl MemoryRateStore {
    pub fn new(max_tracked_clients: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_tracked_clients,
        }
    }
}

impl Default for MemoryRateStore {
    fn default() -> Self {
        Self::new(16_384)
    }
}

impl RateStore for MemoryRateStore {
    fn record(&self, key: &str, policy: RatePolicy, now: Instant) -> RateDecision {
        let mut entries = self.entries.lock().expect("rate store lock poisoned");

        if !entries.contains_key(key) && entries.len() >= self.max_tracked_clients {
            drop_expired(&mut entries, now);
        }

        let entry = entries.entry(key.to_string()).or_insert_with(|| ClientWindow {
            stamps: VecDeque::new(),
            window: policy.window,
        });
        entry.window = policy.window;

        while let Some(oldest) = entry.stamps.front() {
            if now.duration_since(*oldest) >= policy.window {
                entry.stamps.pop_front();
            } else {
                break;
            }
        }

        if entry.stamps.len() >= policy.max_requests {
            let oldest = *entry
                .stamps
                .front()
                .expect("ceiling reached implies at least one stamp");
            let retry_after = policy.window.saturating_sub(now.duration_since(oldest));
            return RateDecision::Limited { retry_after };
        }

        entry.stamps.push_back(now);
        RateDecision::Allowed
    }

    fn sweep(&self, now: Instant) {
        let mut entries = self.entries.lock().expect("rate store lock poisoned");
        drop_expired(&mut entries, now);
    }
}

fn drop_expired(entries: &mut HashMap<String, ClientWindow>, now: Instant) {
    entries.retain(|_, entry| {
        entry
            .stamps
            .back()
            .is_some_and(|newest| now.duration_since(*newest) < entry.window)
    });
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateStore>,
}

impl RateLimiter {
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryRateStore::default()))
    }

    pub fn with_store(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Records one request for `client` under `scope` and fails with a
    /// retry-after error when the window ceiling is exceeded.
    pub fn enforce(&self, scope: &str, client: &str, policy: RatePolicy) -> Result<()> {
        let key = format!("{scope}:{client}");
        match self.store.record(&key, policy, Instant::now()) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Limited { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                Err(LibError::rate_limited(
                    secs,
                    anyhow!(
                        "client {} exceeded {} requests per {:?} on {}",
                        client,
                        policy.max_requests,
                        policy.window,
                        scope,
                    ),
                ))
            }
        }
    }

    pub fn sweep(&self) {
        self.store.sweep(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RatePolicy = RatePolicy::new(3, Duration::from_secs(60));

    #[test]
    fn allows_up_to_the_ceiling_then_limits() {
        let store = MemoryRateStore::default();
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(store.record("add:10.0.0.1", POLICY, start), RateDecision::Allowed);
        }
        match store.record("add:10.0.0.1", POLICY, start) {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            RateDecision::Allowed => panic!("fourth request should be limited"),
        }
    }

    #[test]
    fn window_slide_readmits_the_client() {
        let store = MemoryRateStore::default();
        let start = Instant::now();

        for offset in 0..3 {
            let now = start + Duration::from_secs(offset);
            assert_eq!(store.record("add:10.0.0.1", POLICY, now), RateDecision::Allowed);
        }

        let blocked_at = start + Duration::from_secs(30);
        match store.record("add:10.0.0.1", POLICY, blocked_at) {
            RateDecision::Limited { retry_after } => {
                // Oldest stamp is at t=0, window is 60s.
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            RateDecision::Allowed => panic!("request inside full window should be limited"),
        }

        let after_slide = start + Duration::from_secs(61);
        assert_eq!(
            store.record("add:10.0.0.1", POLICY, after_slide),
            RateDecision::Allowed
        );
    }

    #[test]
    fn clients_are_tracked_independently() {
        let store = MemoryRateStore::default();
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(store.record("add:10.0.0.1", POLICY, now), RateDecision::Allowed);
        }
        assert_eq!(store.record("add:10.0.0.2", POLICY, now), RateDecision::Allowed);
    }

    #[test]
    fn sweep_evicts_idle_clients() {
        let store = MemoryRateStore::default();
        let start = Instant::now();

        assert_eq!(store.record("add:10.0.0.1", POLICY, start), RateDecision::Allowed);
        store.sweep(start + Duration::from_secs(120));

        let entries = store.entries.lock().expect("lock");
        assert!(entries.is_empty());
    }
}
