//! Sliding-window rate limiting keyed by name.
//!
//! One limiter is shared by every conversation using a tool registry, so
//! the window state sits behind a mutex and each check-and-record is a
//! single critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// `max_calls` per minute.
    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a call for `key` if it is within the limit. Returns `false`
    /// without recording when the window is full.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = calls.entry(key.to_string()).or_default();

        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.max_calls {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Calls still available for `key` in the current window.
    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let used = calls.get(key).map_or(0, |timestamps| {
            timestamps
                .iter()
                .filter(|t| now.duration_since(**t) < self.window)
                .count()
        });
        self.max_calls.saturating_sub(used)
    }
}
