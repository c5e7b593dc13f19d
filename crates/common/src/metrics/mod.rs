//! Metrics helpers
//!
//! Records through the `metrics` facade with standardized naming. Installing
//! a recorder/exporter is left to the embedding service.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all AnswerForge metrics
pub const METRICS_PREFIX: &str = "answerforge";

/// Histogram buckets for stage and fetch latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 15.00, 30.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of pipeline queries"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Per-source fetch outcomes"
    );

    describe_gauge!(
        format!("{}_source_results_count", METRICS_PREFIX),
        Unit::Count,
        "Results returned by the last fetch of a source"
    );

    describe_counter!(
        format!("{}_circuit_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Circuit breaker state transitions"
    );

    describe_counter!(
        format!("{}_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Classified errors by category and severity"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Record one finished pipeline query
pub fn record_query(pattern: &str, success: bool, cached: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "pattern" => pattern.to_string(),
        "status" => status,
        "cached" => cached.to_string()
    )
    .increment(1);
}

/// Record one stage execution
pub fn record_stage(stage: &str, status: &str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// Record one source fetch outcome
pub fn record_source_fetch(source: &str, outcome: &str, result_count: usize) {
    counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    gauge!(
        format!("{}_source_results_count", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .set(result_count as f64);
}

/// Record a circuit breaker transition
pub fn record_circuit_transition(service: &str, to_state: &str) {
    counter!(
        format!("{}_circuit_transitions_total", METRICS_PREFIX),
        "service" => service.to_string(),
        "state" => to_state.to_string()
    )
    .increment(1);
}

/// Record a classified error
pub fn record_error(category: &str, severity: &str) {
    counter!(
        format!("{}_errors_total", METRICS_PREFIX),
        "category" => category.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    let name = if hit { "cache_hits_total" } else { "cache_misses_total" };
    counter!(
        format!("{}_{}", METRICS_PREFIX, name),
        "cache" => cache_name.to_string()
    )
    .increment(1);
}
