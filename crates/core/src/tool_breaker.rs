//! Per-tool circuit breaking.
//!
//! A tool that fails `failure_threshold` times in a row is skipped for
//! `cooldown`. When the cooldown runs out the count starts again from
//! zero. Failures here mean dispatched calls that errored, timed out or
//! panicked; calls rejected before dispatch never count.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

pub const DEFAULT_TOOL_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_TOOL_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct ToolHealth {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct ToolBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    tools: Mutex<HashMap<String, ToolHealth>>,
}

impl ToolBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            tools: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ToolHealth>> {
        self.tools.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Err(remaining)` while `tool` is open.
    pub fn check(&self, tool: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut tools = self.lock();
        let Some(health) = tools.get_mut(tool) else {
            return Ok(());
        };
        match health.open_until {
            Some(until) if now < until => Err(until - now),
            Some(_) => {
                info!(tool, "Tool cooldown elapsed, allowing calls again");
                *health = ToolHealth::default();
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn record_success(&self, tool: &str) {
        if let Some(health) = self.lock().get_mut(tool) {
            health.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, tool: &str) {
        let mut tools = self.lock();
        let health = tools.entry(tool.to_string()).or_default();
        health.consecutive_failures += 1;
        if health.consecutive_failures >= self.failure_threshold && health.open_until.is_none() {
            health.open_until = Some(Instant::now() + self.cooldown);
            error!(
                tool,
                failures = health.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Tool circuit opened"
            );
        }
    }

    pub fn consecutive_failures(&self, tool: &str) -> u32 {
        self.lock().get(tool).map_or(0, |h| h.consecutive_failures)
    }
}

impl Default for ToolBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_FAILURE_THRESHOLD, DEFAULT_TOOL_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers() {
        let breaker = ToolBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure("shell");
        }
        assert!(breaker.check("shell").is_ok());
        breaker.record_failure("shell");
        assert_eq!(breaker.check("shell"), Err(Duration::from_secs(60)));
        assert!(breaker.check("read_file").is_ok());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.check("shell").is_ok());
        assert_eq!(breaker.consecutive_failures("shell"), 0);
    }

    #[test]
    fn success_resets_the_count() {
        let breaker = ToolBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure("shell");
        breaker.record_failure("shell");
        breaker.record_success("shell");
        breaker.record_failure("shell");
        assert!(breaker.check("shell").is_ok());
        assert_eq!(breaker.consecutive_failures("shell"), 1);
    }
}
