// src/ingest/mod.rs
//! Retrieval orchestration: fan out to every registered source adapter,
//! bound each call by its own timeout, merge and dedup by `(origin, source_id)`.
//!
//! Identical text from different origins is kept on purpose; the analysis
//! stage collapses it through the ContentKey.

pub mod providers;
pub mod types;

use crate::error::PipelineError;
use crate::ingest::types::{RawItem, SourceAdapter, SourceFailure};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "retrieval_items_total",
            "Items kept after merge + identity dedup."
        );
        describe_counter!(
            "retrieval_duplicates_total",
            "Items dropped because (origin, source_id) was already seen."
        );
        describe_counter!(
            "retrieval_source_errors_total",
            "Adapter errors and timeouts."
        );
        describe_counter!(
            "retrieval_sources_skipped_total",
            "Adapters skipped at registration (not configured)."
        );
        describe_histogram!("retrieval_duration_ms", "Wall time of one fan-out.");
    });
}

/// Maximum characters kept per item after normalization.
pub const MAX_TEXT_CHARS: usize = 4000;

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        regex::Regex::new(r"(?is)</?[a-z][^>]*>").expect("static tag regex")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("static ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

/// Merged output of one fan-out.
#[derive(Debug, Default)]
pub struct Retrieval {
    pub items: Vec<RawItem>,
    pub source_errors: Vec<SourceFailure>,
}

/// Keep the first occurrence of each `(origin, source_id)`, preserving order.
/// Returns the kept items and the number of dropped duplicates.
pub fn dedup_by_identity(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(items.len());
    let mut keep = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for it in items {
        let (origin, source_id) = it.identity();
        if seen.insert((origin.to_string(), source_id.to_string())) {
            keep.push(it);
        } else {
            dropped += 1;
        }
    }
    (keep, dropped)
}

pub struct RetrievalOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    timeout: Duration,
    max_results: usize,
}

impl RetrievalOrchestrator {
    pub fn new(timeout: Duration, max_results: usize) -> Self {
        Self {
            adapters: Vec::new(),
            timeout,
            max_results,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Registration-time classification: an unconfigured adapter is skipped
    /// (logged once), never reported as a runtime error.
    pub fn register<A, F>(&mut self, origin: &str, build: F) -> bool
    where
        A: SourceAdapter + 'static,
        F: FnOnce() -> crate::error::Result<A>,
    {
        ensure_metrics_described();
        match build() {
            Ok(a) => {
                tracing::info!(target: "retrieval", origin, "source adapter registered");
                self.adapters.push(Arc::new(a));
                true
            }
            Err(PipelineError::SourceUnavailable { reason, .. }) => {
                tracing::info!(target: "retrieval", origin, %reason, "source adapter skipped");
                counter!("retrieval_sources_skipped_total").increment(1);
                false
            }
            Err(e) => {
                tracing::warn!(target: "retrieval", origin, error = %e, "source adapter failed to build");
                counter!("retrieval_sources_skipped_total").increment(1);
                false
            }
        }
    }

    /// Register every built-in adapter whose credentials are present.
    pub fn from_env(timeout: Duration, max_results: usize) -> Self {
        use crate::ingest::providers::{
            news_rss::GoogleNewsRssAdapter, reddit::RedditAdapter, serpapi_news::SerpApiNewsAdapter,
            twitter::TwitterAdapter, youtube::YouTubeAdapter,
        };

        let mut o = Self::new(timeout, max_results);
        o.register("reddit", RedditAdapter::from_env);
        o.register("twitter", TwitterAdapter::from_env);
        o.register("youtube", YouTubeAdapter::from_env);
        o.register("google_news", SerpApiNewsAdapter::from_env);
        o.register("news_rss", GoogleNewsRssAdapter::from_env);
        o
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Invoke all adapters concurrently. Never fails: an adapter that errors
    /// or exceeds its timeout contributes one `SourceFailure` and zero items.
    pub async fn retrieve(&self, query: &str) -> Retrieval {
        ensure_metrics_described();
        let t0 = Instant::now();

        let calls = self.adapters.iter().map(|a| {
            let a = Arc::clone(a);
            async move {
                let origin = a.name();
                let res = tokio::time::timeout(self.timeout, a.fetch(query, self.max_results)).await;
                match res {
                    Ok(Ok(items)) => Ok(items),
                    Ok(Err(e)) => Err(SourceFailure {
                        origin: origin.to_string(),
                        error: e.to_string(),
                    }),
                    Err(_) => Err(SourceFailure {
                        origin: origin.to_string(),
                        error: PipelineError::source_transient(
                            origin,
                            format!("timed out after {} ms", self.timeout.as_millis()),
                        )
                        .to_string(),
                    }),
                }
            }
        });

        let mut merged = Vec::new();
        let mut source_errors = Vec::new();
        for res in join_all(calls).await {
            match res {
                Ok(mut items) => merged.append(&mut items),
                Err(f) => {
                    tracing::warn!(target: "retrieval", origin = %f.origin, error = %f.error, "source error");
                    counter!("retrieval_source_errors_total").increment(1);
                    source_errors.push(f);
                }
            }
        }

        let (items, dropped) = dedup_by_identity(merged);

        counter!("retrieval_items_total").increment(items.len() as u64);
        counter!("retrieval_duplicates_total").increment(dropped as u64);
        histogram!("retrieval_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            target: "retrieval",
            query,
            items = items.len(),
            duplicates = dropped,
            errors = source_errors.len(),
            "retrieval finished"
        );

        Retrieval {
            items,
            source_errors,
        }
    }
}
