//! Circuit breaker for provider health.
//!
//! One breaker is shared by every conversation using a provider. State
//! transitions happen under a short-lived mutex so the failure count,
//! open deadline and half-open trial slot always change together.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls allowed
    Closed,
    /// Too many failures, calls fail fast
    Open,
    /// Cooldown elapsed, one trial call allowed
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

/// Rejection returned while the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                open_until: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state. An open breaker whose cooldown has elapsed reports
    /// `HalfOpen` even before the trial call is admitted.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if inner.open_until.is_some_and(|t| Instant::now() >= t) => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask to make a call.
    ///
    /// In the half-open state exactly one caller gets a trial permit; all
    /// others are rejected until that trial settles.
    pub fn acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let until = inner.open_until.unwrap_or(now);
                if now < until {
                    return Err(CircuitOpen {
                        retry_after: until - now,
                    });
                }
                info!("Circuit breaker half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(CircuitOpen {
                        retry_after: Duration::ZERO,
                    });
                }
                inner.trial_in_flight = true;
                Ok(CallPermit::new(self, true))
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.open_until = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        if trial || inner.consecutive_failures >= self.failure_threshold {
            inner.state = CircuitState::Open;
            inner.open_until = Some(Instant::now() + self.cooldown);
            warn!(
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// A fatal error proves the provider answered but not that it works.
    /// It leaves the count alone in the closed state and fails a trial.
    fn on_fatal(&self, trial: bool) {
        if trial {
            let mut inner = self.lock();
            inner.state = CircuitState::Open;
            inner.open_until = Some(Instant::now() + self.cooldown);
            inner.trial_in_flight = false;
        }
    }

    fn on_abandoned(&self) {
        self.lock().trial_in_flight = false;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

/// Permission to make one call. Settle it with the call's outcome; a
/// permit dropped unsettled (the call was cancelled) frees the trial slot.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    /// The call exhausted its retries on transient errors.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// The call failed with a non-transient error.
    pub fn fatal(mut self) {
        self.settled = true;
        self.breaker.on_fatal(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_abandoned();
        }
    }
}
