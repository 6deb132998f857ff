//! Circuit breaker for a single named dependency
//!
//! ```text
//! Closed   --(failure_threshold consecutive failures)--> Open
//! Open     --(recovery_timeout elapsed, next call)-----> HalfOpen
//! HalfOpen --(half_open_requests consecutive successes)-> Closed
//! HalfOpen --(any failure)-----------------------------> Open
//! ```

use crate::errors::{AppError, Result};
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes that close the circuit
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker guarding one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
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

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Admit a call or reject it with `CircuitOpen`.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and admits the call. Rejections leave the state untouched.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_time
            .map(|t| t.elapsed())
            .unwrap_or(self.config.recovery_timeout);

        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.failure_count = 0;
            inner.success_count = 0;
            drop(inner);
            self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
            return Ok(());
        }

        Err(AppError::CircuitOpen {
            service: self.name.clone(),
            retry_after: self.config.recovery_timeout - elapsed,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_requests {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    drop(inner);
                    self.transitioned(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            // Late completion of a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    let failures = inner.failure_count;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    drop(inner);
                    warn!(
                        breaker = %self.name,
                        failures,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    self.transitioned(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.last_failure_time = Some(Instant::now());
                drop(inner);
                warn!(breaker = %self.name, "Half-open probe failed, circuit reopened");
                self.transitioned(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Feed a call outcome into the state machine.
    ///
    /// Errors that are not dependency failures (validation, malformed output,
    /// open-circuit rejections) are neutral.
    pub fn record<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(e) if e.counts_toward_breaker() => self.record_failure(),
            Err(_) => {}
        }
    }

    /// Run one call through the breaker
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;
        let outcome = op().await;
        self.record(&outcome);
        outcome
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        if to == CircuitState::Closed {
            info!(breaker = %self.name, from = %from, "Circuit breaker closed");
        }
        metrics::record_breaker_transition(&self.name, from, to);
    }
}
