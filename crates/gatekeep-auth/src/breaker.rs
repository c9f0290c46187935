//! Circuit breaker for remote identity calls.
//!
//! The breaker counts consecutive connectivity failures of a remote service
//! and stops calling it once a threshold is reached. After a cool-down it
//! admits a single trial call: success closes the circuit again, failure
//! re-opens it.
//!
//! ```text
//!  CLOSED --(failures >= threshold)--> OPEN
//!  OPEN   --(timeout elapsed)--------> HALF_OPEN
//!  HALF_OPEN --(trial ok)------------> CLOSED
//!  HALF_OPEN --(trial failed)--------> OPEN
//! ```
//!
//! Only errors for which [`AuthError::is_connectivity`] holds are counted. An
//! authentication or authorization error is a definitive answer and counts as
//! a success. A validation error (malformed payload) is neutral: it releases
//! a half-open trial slot but neither closes the circuit nor clears the
//! failure count.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::clock::{SharedClock, elapsed};
use crate::config::BreakerConfig;
use crate::error::{AuthError, ErrorCategory};

/// Delay suggested to callers rejected while a half-open trial is running.
const TRIAL_BUSY_RETRY: Duration = Duration::from_secs(1);

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast.
    Open,
    /// One trial call is admitted.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<OffsetDateTime>,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_time: Option<OffsetDateTime>,
    pub retry_after_secs: u64,
}

/// A circuit breaker guarding one remote service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &BreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            timeout: config.timeout,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Breaker name, used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Does not perform the OPEN → HALF_OPEN transition.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Returns whether a call may be attempted now.
    ///
    /// In OPEN this moves the breaker to HALF_OPEN once the timeout has
    /// elapsed since the last failure.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if self.cooled_down(&inner, now) {
                    self.enter_half_open(&mut inner);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time until an open breaker admits a trial. Zero unless OPEN.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let inner = self.inner.lock();
        self.remaining_open(&inner, now)
    }

    /// Runs `call` through the breaker.
    ///
    /// When the breaker refuses, `call` is never invoked and
    /// [`AuthError::ServiceUnavailable`] is returned. Otherwise the outcome is
    /// recorded and passed through unchanged.
    pub async fn execute<T, F, Fut>(&self, call: F) -> AuthResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                tracing::debug!(
                    breaker = %self.name,
                    retry_after_secs = retry_after.as_secs(),
                    "Circuit open, failing fast"
                );
                return Err(AuthError::service_unavailable(&self.name, retry_after));
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: permit == Permit::Trial,
        };
        let result = call().await;
        guard.armed = false;

        match &result {
            Err(e) if e.is_connectivity() => self.record_failure(),
            Err(e) if e.category() == ErrorCategory::Validation => self.record_neutral(),
            _ => self.record_success(),
        }
        result
    }

    /// Records a successful call or a definitive rejection.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = %self.name, "Circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    /// Records an outcome that says nothing about availability.
    pub fn record_neutral(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        tracing::debug!(
            breaker = %self.name,
            state = ?inner.state,
            failures = inner.failure_count,
            "Malformed response, breaker state unchanged"
        );
    }

    /// Records a connectivity failure.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);
        inner.trial_in_flight = false;

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            BreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = BreakerState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    timeout_secs = self.timeout.as_secs(),
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Forces the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
    }

    /// Returns a snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_time: inner.last_failure_time,
            retry_after_secs: self.remaining_open(&inner, now).as_secs(),
        }
    }

    fn try_acquire(&self) -> Result<Permit, Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Permit::Normal),
            BreakerState::Open => {
                if self.cooled_down(&inner, now) {
                    self.enter_half_open(&mut inner);
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                } else {
                    Err(self.remaining_open(&inner, now))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(TRIAL_BUSY_RETRY)
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    fn cooled_down(&self, inner: &Inner, now: OffsetDateTime) -> bool {
        inner
            .last_failure_time
            .is_none_or(|at| elapsed(now, at) >= self.timeout)
    }

    fn remaining_open(&self, inner: &Inner, now: OffsetDateTime) -> Duration {
        match (inner.state, inner.last_failure_time) {
            (BreakerState::Open, Some(at)) => self.timeout.saturating_sub(elapsed(now, at)),
            _ => Duration::ZERO,
        }
    }

    fn enter_half_open(&self, inner: &mut Inner) {
        inner.state = BreakerState::HalfOpen;
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, "Circuit half-open, admitting trial call");
    }
}

/// Releases the half-open trial slot if the trial future is dropped before
/// it completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Named breakers, one per remote service or tenant.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: SharedClock,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    &self.config,
                    Arc::clone(&self.clock),
                ))
            })
            .value()
            .clone()
    }

    /// Returns the breaker for `name` if it exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Snapshots of all breakers, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
