//! Sliding window rate limiting.
//!
//! The pipeline uses this to cap how often replays of one credential are
//! logged at warn level and written to the audit log. Replayed copies of a
//! captured frame can be re-broadcast without end, and each audit line is
//! an fsync. The limiter never decides whether a frame is accepted. The key
//! table is bounded; once full, unseen keys are refused until entries age out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A sliding window rate limiter keyed by string.
pub struct RateLimiter {
    /// Event timestamps per key.
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    /// Maximum events allowed per window.
    max_requests: usize,
    /// Maximum distinct keys tracked at once.
    max_keys: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - Maximum events allowed per key per window
    /// * `window` - Duration of the sliding window
    /// * `max_keys` - Cap on distinct keys tracked
    pub fn new(max_requests: usize, window: Duration, max_keys: usize) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            max_requests,
            max_keys,
            window,
        }
    }

    /// Check if an event for `key` is allowed and record it.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check_and_record(&self, key: &str) -> bool {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if !requests.contains_key(key) && requests.len() >= self.max_keys {
            Self::prune(&mut requests, now, self.window);
            if requests.len() >= self.max_keys {
                return false;
            }
        }

        let entry = requests.entry(key.to_string()).or_default();
        entry.retain(|&t| now.duration_since(t) < self.window);

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }

    fn prune(requests: &mut HashMap<String, Vec<Instant>>, now: Instant, window: Duration) {
        requests.retain(|_, times| {
            times.retain(|&t| now.duration_since(t) < window);
            !times.is_empty()
        });
    }

    /// Drop keys with no events inside the window.
    pub fn cleanup(&self) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut requests, Instant::now(), self.window);
    }

    /// Number of keys being tracked.
    pub fn tracked_keys(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Start a background cleanup task.
    pub fn start_cleanup_task(self: &std::sync::Arc<Self>, interval: Duration) {
        let limiter = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                limiter.cleanup();
            }
        });
    }
}
