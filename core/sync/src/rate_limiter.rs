//! Per-key freshness windows.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Decides whether data for a key is old enough to fetch again.
#[derive(Debug)]
pub struct RateLimiter<K> {
    timeout: Duration,
    last_fetched: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash> RateLimiter<K> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_fetched: Mutex::new(HashMap::new()),
        }
    }

    /// True when `key` was never seen or its window expired.
    ///
    /// A true answer restarts the window for `key`.
    pub fn should_fetch(&self, key: K) -> bool {
        let now = Instant::now();
        let mut last_fetched = self.last_fetched.lock();
        match last_fetched.get(&key) {
            Some(at) if now.duration_since(*at) <= self.timeout => false,
            _ => {
                last_fetched.insert(key, now);
                true
            }
        }
    }

    /// Forget `key`, so the next check fetches.
    pub fn reset(&self, key: &K) {
        self.last_fetched.lock().remove(key);
    }
}
