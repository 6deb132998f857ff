//! Resilience pipeline for external calls
//!
//! Three composable strategies wrap every dependency call:
//! - [`CircuitBreaker`] (outer): fast-fails while the dependency is unhealthy
//! - [`Retrier`] (middle): bounded exponential backoff
//! - [`Deadline`] (inner): per-attempt timeout
//!
//! An open circuit short-circuits everything below it. A timed-out attempt
//! is a failure for both the retry loop and the breaker; one pipeline call
//! is one breaker outcome no matter how many attempts it took.

mod breaker;
mod deadline;
mod registry;
mod retry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use deadline::Deadline;
pub use registry::BreakerRegistry;
pub use retry::{Retrier, RetryPolicy};

use crate::errors::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Dependency names used across the engine
pub mod deps {
    pub const EMBEDDING: &str = "embedding";
    pub const CURRICULUM_SEARCH: &str = "curriculum-search";
    pub const QUESTION_SEARCH: &str = "question-search";
    pub const LANGUAGE_MODEL: &str = "language-model";
}

/// Breaker → retry → deadline composition for one dependency
#[derive(Debug, Clone)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retrier: Retrier,
    deadline: Deadline,
}

impl Resilience {
    pub fn new(breaker: Arc<CircuitBreaker>, retrier: Retrier, deadline: Deadline) -> Self {
        Self {
            breaker,
            retrier,
            deadline,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Run `op` through the pipeline. `op` is invoked once per attempt.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.acquire()?;
        let outcome = self.retrier.run(|| self.deadline.run(op())).await;
        self.breaker.record(&outcome);
        outcome
    }
}

impl BreakerRegistry {
    /// Assemble a pipeline around the named breaker
    pub fn resilience(&self, name: &str, retry: RetryPolicy, attempt_timeout: Duration) -> Resilience {
        Resilience::new(
            self.get(name),
            Retrier::new(name, retry),
            Deadline::new(name, attempt_timeout),
        )
    }
}
