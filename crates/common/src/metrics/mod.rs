//! Metrics and observability utilities
//!
//! Counters and histograms for the retrieval pipeline and its resilience
//! layer, with standardized naming. Recording is a no-op until the host
//! process installs a `metrics` recorder.

use crate::resilience::CircuitState;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all engine metrics
pub const METRICS_PREFIX: &str = "kazanim";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_merge_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Hybrid merge requests by source outcome"
    );

    describe_histogram!(
        format!("{}_merge_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid merge latency in seconds"
    );

    describe_histogram!(
        format!("{}_merge_results", METRICS_PREFIX),
        Unit::Count,
        "Candidates returned per merge"
    );

    describe_counter!(
        format!("{}_breaker_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Circuit breaker state transitions"
    );

    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retried dependency attempts"
    );

    describe_counter!(
        format!("{}_rerank_total", METRICS_PREFIX),
        Unit::Count,
        "Rerank requests by outcome"
    );

    describe_counter!(
        format!("{}_synthesis_total", METRICS_PREFIX),
        Unit::Count,
        "Synthesis requests by outcome"
    );

    describe_counter!(
        format!("{}_budget_dropped_total", METRICS_PREFIX),
        Unit::Count,
        "Items dropped to fit a token budget"
    );

    tracing::info!("Metrics registered");
}

/// Outcome label for a merge: which sources answered
pub fn record_merge(duration_secs: f64, outcome: &str, result_count: usize) {
    counter!(
        format!("{}_merge_requests_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_merge_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    histogram!(format!("{}_merge_results", METRICS_PREFIX)).record(result_count as f64);
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        format!("{}_breaker_transitions_total", METRICS_PREFIX),
        "breaker" => breaker.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_retry(dependency: &str) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "dependency" => dependency.to_string()
    )
    .increment(1);
}

pub fn record_rerank(outcome: &str) {
    counter!(
        format!("{}_rerank_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_synthesis(outcome: &str) {
    counter!(
        format!("{}_synthesis_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_budget_drop(preparer: &str, dropped: usize) {
    if dropped == 0 {
        return;
    }
    counter!(
        format!("{}_budget_dropped_total", METRICS_PREFIX),
        "preparer" => preparer.to_string()
    )
    .increment(dropped as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        register_metrics();
        record_merge(0.2, "both", 5);
        record_breaker_transition("embedding", CircuitState::Closed, CircuitState::Open);
        record_budget_drop("candidates", 0);
    }
}
