//! Prometheus metrics for the override engine.
//!
//! Tracks interception outcomes per transport, rule hits and injected latency.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Calls observed by an installed adapter
    pub static ref CALLS_TOTAL: CounterVec = register_counter_vec!(
        "override_calls_total",
        "Total number of transport calls observed by the interception adapters",
        &["transport", "outcome"]  // outcome: replace|status|patch|delay|passthrough
    )
    .unwrap();

    /// Rule hits
    pub static ref RULE_MATCHES_TOTAL: CounterVec = register_counter_vec!(
        "override_rule_matches_total",
        "Total number of calls resolved to a rule",
        &["rule_id", "action"]
    )
    .unwrap();

    /// Artificial delay in milliseconds
    pub static ref DELAY_INJECTED_MS: HistogramVec = register_histogram_vec!(
        "override_delay_injected_ms",
        "Histogram of injected delay in milliseconds",
        &["rule_id"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap();

    /// Time spent waiting on the real network for patch actions
    pub static ref UPSTREAM_DURATION_MS: HistogramVec = register_histogram_vec!(
        "override_upstream_duration_ms",
        "Duration of real requests issued to produce patched responses",
        &["status"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Rules loaded in the current snapshot
    pub static ref RULES_LOADED: GaugeVec = register_gauge_vec!(
        "override_rules_loaded",
        "Number of rules in the active snapshot",
        &["state"]  // state: enabled|disabled
    )
    .unwrap();

    /// Rule problems surfaced at compile or execution time
    pub static ref RULE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "override_rule_errors_total",
        "Total number of rule diagnostics",
        &["rule_id", "error_type"]  // error_type: invalid_pattern|patch_not_json|patch_upstream_failed
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_call(transport: &str, outcome: &str) {
    CALLS_TOTAL.with_label_values(&[transport, outcome]).inc();
}

pub fn record_rule_match(rule_id: &str, action: &str) {
    RULE_MATCHES_TOTAL
        .with_label_values(&[rule_id, action])
        .inc();
}

pub fn record_delay(rule_id: &str, delay_ms: u64) {
    DELAY_INJECTED_MS
        .with_label_values(&[rule_id])
        .observe(delay_ms as f64);
}

pub fn record_upstream_duration(status: u16, duration_ms: f64) {
    let status = status.to_string();
    UPSTREAM_DURATION_MS
        .with_label_values(&[status.as_str()])
        .observe(duration_ms);
}

/// Publish the size of a freshly installed snapshot.
pub fn set_rules_loaded(enabled: usize, disabled: usize) {
    RULES_LOADED
        .with_label_values(&["enabled"])
        .set(enabled as f64);
    RULES_LOADED
        .with_label_values(&["disabled"])
        .set(disabled as f64);
}

pub fn record_rule_error(rule_id: &str, error_type: &str) {
    RULE_ERRORS_TOTAL
        .with_label_values(&[rule_id, error_type])
        .inc();
}
