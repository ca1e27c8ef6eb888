//! Circuit breaker guarding a single named resource.
//!
//! States and transitions:
//!
//! ```text
//! Closed   -> Open      failures in the sliding window cross the threshold
//! Open     -> HalfOpen  cool-down elapsed; the caller that notices takes the trial slot
//! HalfOpen -> Closed    trial call succeeds
//! HalfOpen -> Open      trial call fails (cool-down restarts)
//! ```
//!
//! All bookkeeping for one breaker happens under a single lock, which is
//! released while the guarded operation runs.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// When the sliding window counts as "failing".
///
/// Deserializes untagged: an integer is a count, a float is a ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailureThreshold {
    /// Trip once this many failures sit in the window.
    Count(u32),
    /// Trip once the window is full and this fraction of it failed.
    Ratio(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: FailureThreshold,
    pub sliding_window_size: u32,
    pub open_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FailureThreshold::Count(5),
            sliding_window_size: 10,
            open_cooldown: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sliding_window_size == 0 {
            return Err("sliding_window_size must be greater than 0".to_string());
        }

        match self.failure_threshold {
            FailureThreshold::Count(0) => {
                return Err("failure_threshold count must be greater than 0".to_string());
            }
            FailureThreshold::Count(n) if n > self.sliding_window_size => {
                return Err(format!(
                    "failure_threshold count ({n}) cannot exceed sliding_window_size ({})",
                    self.sliding_window_size
                ));
            }
            FailureThreshold::Ratio(r) if !(r > 0.0 && r <= 1.0) => {
                return Err(format!("failure_threshold ratio must be in (0, 1], got {r}"));
            }
            _ => {}
        }

        if self.open_cooldown.is_zero() {
            return Err("open_cooldown must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the resource was not contacted.
    #[error("circuit breaker '{resource}' is open")]
    CircuitOpen { resource: String },

    #[error(transparent)]
    Failed(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub window_calls: usize,
    pub window_failures: usize,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub transitions: u64,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every transition; permits from an older generation are stale.
    generation: u64,
    last_transition: DateTime<Utc>,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

#[derive(Debug, Clone, Copy)]
enum PermitKind {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy)]
struct Permit {
    kind: PermitKind,
    generation: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Build a breaker, rejecting configs that [`BreakerConfig::validate`] refuses.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, String> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| format!("invalid config for breaker '{name}': {e}"))?;

        info!(
            resource = %name,
            failure_threshold = ?config.failure_threshold,
            sliding_window_size = config.sliding_window_size,
            open_cooldown_secs = config.open_cooldown.as_secs_f64(),
            "Circuit breaker initialized"
        );

        Ok(Self {
            name,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.sliding_window_size as usize),
                opened_at: None,
                trial_in_flight: false,
                generation: 0,
                last_transition: Utc::now(),
                total_successes: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` if the breaker admits it, recording the outcome.
    ///
    /// A rejected call returns [`BreakerError::CircuitOpen`] without polling
    /// `operation` at all.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(BreakerError::CircuitOpen { resource: self.name.clone() });
        };

        let mut guard = CallGuard { breaker: self, permit: Some(permit) };
        let result = operation().await;
        guard.complete(result.is_ok());

        result.map_err(BreakerError::Failed)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            window_calls: inner.window.len(),
            window_failures: inner.window.iter().filter(|failed| **failed).count(),
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            transitions: inner.generation,
            last_transition: inner.last_transition,
        }
    }

    fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                Some(Permit { kind: PermitKind::Normal, generation: inner.generation })
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.open_cooldown);

                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Some(Permit { kind: PermitKind::Trial, generation: inner.generation })
                } else {
                    inner.rejected_calls += 1;
                    debug!(resource = %self.name, "Circuit open, rejecting call");
                    None
                }
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some(Permit { kind: PermitKind::Trial, generation: inner.generation })
            }
            CircuitState::HalfOpen => {
                inner.rejected_calls += 1;
                debug!(resource = %self.name, "Trial call in flight, rejecting call");
                None
            }
        }
    }

    fn record(&self, permit: Permit, success: bool) {
        let mut inner = self.inner.lock();

        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }

        if permit.generation != inner.generation {
            debug!(
                resource = %self.name,
                success,
                "Outcome of call admitted under an earlier state ignored"
            );
            return;
        }

        match (permit.kind, inner.state) {
            (PermitKind::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                if success {
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (PermitKind::Normal, CircuitState::Closed) => {
                let capacity = self.config.sliding_window_size as usize;
                if inner.window.len() == capacity {
                    inner.window.pop_front();
                }
                inner.window.push_back(!success);

                if !success && self.threshold_crossed(&inner.window) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            _ => {}
        }
    }

    fn threshold_crossed(&self, window: &VecDeque<bool>) -> bool {
        let failures = window.iter().filter(|failed| **failed).count();

        match self.config.failure_threshold {
            FailureThreshold::Count(n) => failures >= n as usize,
            FailureThreshold::Ratio(ratio) => {
                window.len() == self.config.sliding_window_size as usize
                    && failures as f64 / window.len() as f64 >= ratio
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.last_transition = Utc::now();

        match to {
            CircuitState::Open => {
                let window_failures = inner.window.iter().filter(|failed| **failed).count();
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(
                    resource = %self.name,
                    from = ?from,
                    window_failures,
                    open_cooldown_secs = self.config.open_cooldown.as_secs_f64(),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(resource = %self.name, "Circuit breaker half-open, admitting trial call");
            }
            CircuitState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(resource = %self.name, "Circuit breaker closed");
            }
        }
    }
}

/// Records the outcome of an admitted call, or a failure if the call's
/// future is dropped before it completes.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl CallGuard<'_> {
    fn complete(&mut self, success: bool) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, success);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            warn!(resource = %self.breaker.name, "Call abandoned before completion");
            self.breaker.record(permit, false);
        }
    }
}
