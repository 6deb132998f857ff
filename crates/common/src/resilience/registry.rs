//! Registry of named circuit breakers

use super::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lazily creates one breaker per dependency name and shares it between
/// every component that talks to that dependency.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Use a dedicated config for one dependency
    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Build from the resilience section of the engine config
    pub fn from_config(config: &crate::config::ResilienceConfig) -> Self {
        let mut registry = Self::new((&config.breaker).into());
        for name in config.breaker_overrides.keys() {
            registry.overrides.insert(name.clone(), config.breaker_for(name));
        }
        registry
    }

    /// Breaker for `name`, created on first use
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.overrides.get(name).unwrap_or(&self.defaults).clone();
                debug!(breaker = name, ?config, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// State of every breaker created so far, sorted by name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.lock().values().cloned().collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Close every breaker and zero its counters
    pub fn reset(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}
