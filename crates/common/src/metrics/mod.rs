//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency-oriented histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all FinSight metrics
pub const METRICS_PREFIX: &str = "finsight";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Buckets for embedding and generation latency
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of vector searches"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Vector search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from the last search"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Embeddings served by the deterministic fallback"
    );

    // Tool metrics
    describe_counter!(
        format!("{}_tool_executions_total", METRICS_PREFIX),
        Unit::Count,
        "Total tool executions"
    );

    describe_histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Tool execution latency in seconds"
    );

    // Orchestration metrics
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Answers produced, by strategy and outcome"
    );

    describe_histogram!(
        format!("{}_answer_confidence", METRICS_PREFIX),
        Unit::Count,
        "Confidence attached to produced answers"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents stored"
    );

    // Cache metrics
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

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, backend: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record embedding metrics. A failed primary call is a fallback.
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_fallbacks_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a single tool execution
pub fn record_tool(duration_secs: f64, tool: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_tool_executions_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a produced answer
pub fn record_answer(strategy: &str, outcome: &str, confidence: f32) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_answer_confidence", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(confidence as f64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record document ingestion
pub fn record_ingestion(count: usize, source: &str) {
    counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, UPSTREAM_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper is a no-op
        let metrics = RequestMetrics::start("POST", "/v1/ask");
        metrics.finish(200);
        record_tool(0.01, "get_cash_flow", true);
        record_answer("tools", "synthesized", 0.9);
        record_cache(false, "live_data");
        record_ingestion(3, "samples");
    }
}
