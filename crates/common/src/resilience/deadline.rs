//! Per-attempt timeout

use crate::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounds a single attempt; expiry surfaces as a retryable `Timeout`
#[derive(Debug, Clone)]
pub struct Deadline {
    operation: String,
    timeout: Duration,
}

impl Deadline {
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Timeout {
                operation: self.operation.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
