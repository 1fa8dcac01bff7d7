use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish static gauges.
    /// Fails if another recorder is already installed in this process.
    pub fn init(extraction_capacity: usize) -> anyhow::Result<Self> {
        // Default buckets avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        describe_all();
        gauge!("extraction_limiter_capacity").set(extraction_capacity as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe_all() {
    describe_counter!("retrieval_items_total", "Items returned by all sources after dedup.");
    describe_counter!("retrieval_source_errors_total", "Source calls that failed or timed out.");
    describe_counter!("analysis_cache_hits_total", "Result cache hits.");
    describe_counter!("analysis_cache_misses_total", "Result cache misses.");
    describe_counter!("analysis_cache_conflicts_total", "Rejected writes of a differing result.");
    describe_counter!("analysis_fast_calls_total", "Fast classifier invocations.");
    describe_counter!("extraction_calls_total", "Extraction attempts through the limiter.");
    describe_counter!("extraction_retries_total", "Extraction retries after rate limiting.");
    describe_counter!(
        "analysis_extraction_fallbacks_total",
        "Items that fell back to the fast-only result."
    );
    describe_counter!("pipeline_items_saved_total", "FeedItems written.");
    describe_counter!("pipeline_write_failures_total", "FeedItems skipped on write failure.");
    describe_counter!("pipeline_runs_total", "Finished runs by terminal state.");
    describe_counter!("store_items_purged_total", "FeedItems removed by retention.");
    describe_gauge!("analysis_cache_entries", "Entries held by the result cache.");
    describe_gauge!("extraction_in_flight", "Extraction calls currently holding a permit.");
    describe_gauge!("extraction_limiter_capacity", "Configured extraction concurrency.");
    describe_histogram!("pipeline_run_duration_ms", "Wall time of one pipeline run.");
    describe_histogram!("retrieval_duration_ms", "Wall time of one multi-source retrieval.");
}
