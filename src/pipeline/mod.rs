// src/pipeline/mod.rs
//! # Analysis pipeline
//! One run per `(query, mode)`:
//! `Pending → Retrieving → Analyzing → Persisting → Done`, or `Failed(reason)`
//! when storage cannot be used at all. Per-source, per-item and per-write
//! failures are absorbed and counted in `RunStats`.

pub mod runs;

use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::analyze::content_key::ContentKey;
use crate::analyze::routing::{AnalysisMode, Route, RoutingPolicy};
use crate::analyze::types::AnalysisResult;
use crate::analyze::{Analyzer, ExtractionStatus, ResultCache};
use crate::error::{PipelineError, Result};
use crate::ingest::types::RawItem;
use crate::ingest::RetrievalOrchestrator;
use crate::store::{DynStore, FeedItem, InsertOutcome};

pub use runs::{RunId, RunRecord, RunRegistry, RunState, RunStats};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Finished runs by terminal state.");
        describe_counter!("pipeline_items_saved_total", "FeedItems written.");
        describe_counter!(
            "pipeline_write_failures_total",
            "FeedItems skipped because the write failed."
        );
        describe_histogram!("pipeline_run_duration_ms", "Wall time of one run.");
    });
}

/// How one distinct text of the batch got its result.
enum KeyOutcome {
    Cached(AnalysisResult),
    Fresh {
        result: AnalysisResult,
        route: Route,
        extraction: ExtractionStatus,
    },
}

impl KeyOutcome {
    fn result(&self) -> &AnalysisResult {
        match self {
            Self::Cached(r) => r,
            Self::Fresh { result, .. } => result,
        }
    }
}

pub struct Pipeline {
    orchestrator: Arc<RetrievalOrchestrator>,
    analyzer: Arc<Analyzer>,
    cache: Arc<ResultCache>,
    routing: RoutingPolicy,
    store: DynStore,
    runs: Arc<RunRegistry>,
}

impl Pipeline {
    pub fn new(
        orchestrator: Arc<RetrievalOrchestrator>,
        analyzer: Arc<Analyzer>,
        cache: Arc<ResultCache>,
        routing: RoutingPolicy,
        store: DynStore,
        runs: Arc<RunRegistry>,
    ) -> Self {
        Self {
            orchestrator,
            analyzer,
            cache,
            routing,
            store,
            runs,
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Fire-and-continue: registers the run and spawns it on the runtime.
    /// The caller only gets the RunId; progress lives in the registry.
    pub fn start(self: &Arc<Self>, query: &str, mode: AnalysisMode) -> RunId {
        let id = self.runs.create(query, mode);
        let this = Arc::clone(self);
        let query = query.to_string();
        tokio::spawn(async move {
            this.drive(id, &query, mode).await;
        });
        tracing::info!(target: "pipeline", run_id = %id, mode = mode.as_str(), "run started");
        id
    }

    /// Run to completion in the current task and return the final record.
    pub async fn run(&self, query: &str, mode: AnalysisMode) -> RunRecord {
        let id = self.runs.create(query, mode);
        let started_at = chrono::Utc::now();
        let (state, stats) = self.drive(id, query, mode).await;
        match self.runs.get(id) {
            Some(rec) => rec,
            // evicted by newer runs while in flight
            None => RunRecord {
                run_id: id,
                query: query.to_string(),
                mode,
                state,
                started_at,
                finished_at: Some(chrono::Utc::now()),
                stats,
                source_errors: Vec::new(),
            },
        }
    }

    async fn drive(&self, id: RunId, query: &str, mode: AnalysisMode) -> (RunState, RunStats) {
        ensure_metrics_described();
        let t0 = Instant::now();
        let mut stats = RunStats::default();
        let outcome = self.execute(id, query, mode, &mut stats).await;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("pipeline_run_duration_ms").record(ms);

        let state = match outcome {
            Ok(()) => {
                counter!("pipeline_runs_total", "state" => "done").increment(1);
                tracing::info!(
                    target: "pipeline",
                    run_id = %id,
                    query,
                    retrieved = stats.items_retrieved,
                    saved = stats.items_saved,
                    cache_hits = stats.cache_hits,
                    extraction_calls = stats.extraction_calls,
                    fallbacks = stats.extraction_fallbacks,
                    write_failures = stats.write_failures,
                    llm_reduction = stats.llm_reduction,
                    duration_ms = ms as u64,
                    "run done"
                );
                RunState::Done
            }
            Err(e) => {
                counter!("pipeline_runs_total", "state" => "failed").increment(1);
                tracing::error!(target: "pipeline", run_id = %id, query, error = %e, "run failed");
                RunState::Failed {
                    reason: e.to_string(),
                }
            }
        };
        let snapshot = stats.clone();
        self.runs.update(id, |r| r.stats = snapshot);
        self.runs.set_state(id, state.clone());
        (state, stats)
    }

    async fn execute(
        &self,
        id: RunId,
        query: &str,
        mode: AnalysisMode,
        stats: &mut RunStats,
    ) -> Result<()> {

        // RETRIEVING: partial source errors never stop the run
        self.runs.set_state(id, RunState::Retrieving);
        let retrieval = self.orchestrator.retrieve(query).await;
        stats.items_retrieved = retrieval.items.len();
        stats.source_errors = retrieval.source_errors.len();
        let source_errors = retrieval.source_errors;
        self.runs.update(id, |r| r.source_errors = source_errors);
        let items = retrieval.items;

        // ANALYZING
        self.runs.set_state(id, RunState::Analyzing);
        let keyed: Vec<(ContentKey, RawItem)> = items
            .into_iter()
            .map(|it| (ContentKey::of(&it.text), it))
            .collect();
        let results = self.analyze_batch(&keyed, mode, stats).await;

        // PERSISTING
        self.runs.set_state(id, RunState::Persisting);
        self.store.ping().await?;
        for (key, raw) in keyed {
            let Some(result) = results.get(&key) else {
                continue;
            };
            let item = FeedItem::new(query, raw, key, result.clone());
            match self.store.insert(item).await {
                Ok(InsertOutcome::Inserted) => {
                    stats.items_saved += 1;
                    counter!("pipeline_items_saved_total").increment(1);
                }
                Ok(InsertOutcome::Duplicate) => stats.duplicates_skipped += 1,
                Err(e @ PipelineError::StorageUnavailable(_)) => return Err(e),
                Err(e) => {
                    stats.write_failures += 1;
                    counter!("pipeline_write_failures_total").increment(1);
                    tracing::warn!(target: "store", run_id = %id, error = %e, "feed item write skipped");
                }
            }
        }

        stats.finish();
        Ok(())
    }

    /// Analyze each distinct ContentKey once (single-flight within the batch);
    /// the route is decided by the key's first position in the batch.
    async fn analyze_batch(
        &self,
        keyed: &[(ContentKey, RawItem)],
        mode: AnalysisMode,
        stats: &mut RunStats,
    ) -> HashMap<ContentKey, AnalysisResult> {
        let mut firsts: Vec<(usize, &ContentKey, &RawItem)> = Vec::new();
        let mut seen: HashSet<&ContentKey> = HashSet::with_capacity(keyed.len());
        for (idx, (key, raw)) in keyed.iter().enumerate() {
            if seen.insert(key) {
                firsts.push((idx, key, raw));
            }
        }
        stats.distinct_texts = firsts.len();

        let jobs = firsts.into_iter().map(|(idx, key, raw)| async move {
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(target: "analysis", key = key.short(), "cache hit");
                return (key.clone(), KeyOutcome::Cached(hit));
            }
            let route = self.routing.decide_with_mode(mode, raw, idx);
            let outcome = self.analyzer.analyze(key, &raw.text, route).await;
            let mut result = outcome.result.clone();
            if outcome.cacheable() {
                if let Err(e) = self.cache.put(key.clone(), outcome.result.clone()) {
                    // another run got there first; keep the cached value so
                    // every FeedItem for this key carries the same result
                    tracing::debug!(target: "analysis", key = key.short(), error = %e, "using existing cache entry");
                    if let Some(existing) = self.cache.get(key) {
                        result = existing;
                    }
                }
            }
            (
                key.clone(),
                KeyOutcome::Fresh {
                    result,
                    route,
                    extraction: outcome.extraction,
                },
            )
        });

        let mut out = HashMap::new();
        for (key, outcome) in join_all(jobs).await {
            match &outcome {
                KeyOutcome::Cached(_) => stats.cache_hits += 1,
                KeyOutcome::Fresh {
                    route, extraction, ..
                } => {
                    stats.fast_calls += 1;
                    if *route == Route::FastPlusExtract {
                        stats.extraction_calls += 1;
                    }
                    if matches!(extraction, ExtractionStatus::FellBack(_)) {
                        stats.extraction_fallbacks += 1;
                    }
                }
            }
            out.insert(key, outcome.result().clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::MockExtractor;
    use crate::analyze::classifier::LexiconClassifier;
    use crate::analyze::limiter::ExtractionLimiter;
    use crate::config::RetryPolicy;
    use crate::ingest::types::SourceAdapter;
    use crate::store::{FeedFilter, FeedStore, InMemoryStore, Purge};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct Fixed(&'static str, Vec<(&'static str, String)>);

    #[async_trait::async_trait]
    impl SourceAdapter for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn fetch(&self, _q: &str, _n: usize) -> Result<Vec<RawItem>> {
            Ok(self
                .1
                .iter()
                .map(|(id, text)| RawItem {
                    origin: self.0.to_string(),
                    text: text.clone(),
                    external_timestamp: Utc::now(),
                    source_id: id.to_string(),
                    url: None,
                })
                .collect())
        }
    }

    fn pipeline(adapters: Vec<Fixed>, store: DynStore) -> Arc<Pipeline> {
        let adapters = adapters
            .into_iter()
            .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
            .collect();
        pipeline_with(adapters, store, Arc::new(RunRegistry::default()))
    }

    fn pipeline_with(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: DynStore,
        runs: Arc<RunRegistry>,
    ) -> Arc<Pipeline> {
        let mut o = RetrievalOrchestrator::new(Duration::from_secs(1), 20);
        for a in adapters {
            o = o.with_adapter(a);
        }
        let limiter = Arc::new(ExtractionLimiter::new(
            2,
            RetryPolicy::default(),
            Duration::from_secs(5),
        ));
        let analyzer = Analyzer::new(
            Arc::new(LexiconClassifier::new()),
            Arc::new(MockExtractor::new(vec!["battery".into()])),
            limiter,
        );
        Arc::new(Pipeline::new(
            Arc::new(o),
            Arc::new(analyzer),
            Arc::new(ResultCache::new()),
            RoutingPolicy::default(),
            store,
            runs,
        ))
    }

    /// Registers another run mid-fetch, pushing the caller's record out.
    struct Crowding(Arc<RunRegistry>);

    #[async_trait::async_trait]
    impl SourceAdapter for Crowding {
        fn name(&self) -> &'static str {
            "crowding"
        }
        async fn fetch(&self, _q: &str, _n: usize) -> Result<Vec<RawItem>> {
            self.0.create("other", AnalysisMode::Hybrid);
            Ok(vec![RawItem {
                origin: "crowding".into(),
                text: "fine".into(),
                external_timestamp: Utc::now(),
                source_id: "1".into(),
                url: None,
            }])
        }
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl FeedStore for Unreachable {
        async fn insert(&self, _item: FeedItem) -> Result<InsertOutcome> {
            Err(PipelineError::StorageUnavailable("refused".into()))
        }
        async fn query(&self, _f: &FeedFilter, _since: DateTime<Utc>) -> Result<Vec<FeedItem>> {
            Err(PipelineError::StorageUnavailable("refused".into()))
        }
        async fn recent(&self, _q: &str, _limit: usize) -> Result<Vec<FeedItem>> {
            Err(PipelineError::StorageUnavailable("refused".into()))
        }
        async fn delete_older_than(&self, _q: Option<&str>, _days: u32) -> Result<Purge> {
            Err(PipelineError::StorageUnavailable("refused".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(PipelineError::StorageUnavailable("refused".into()))
        }
        fn kind(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache_without_duplicates() {
        let store: DynStore = Arc::new(InMemoryStore::new());
        let long = format!("{} and the battery is great", "word ".repeat(30));
        let p = pipeline(
            vec![Fixed("reddit", vec![("1", long), ("2", "short ok".into())])],
            store.clone(),
        );

        let first = p.run("phone", AnalysisMode::Hybrid).await;
        assert_eq!(first.state, RunState::Done);
        assert_eq!(first.stats.items_saved, 2);
        assert_eq!(first.stats.extraction_calls, 1);
        assert_eq!(first.stats.cache_hits, 0);

        let second = p.run("phone", AnalysisMode::Hybrid).await;
        assert_eq!(second.stats.cache_hits, 2);
        assert_eq!(second.stats.fast_calls, 0);
        assert_eq!(second.stats.items_saved, 0);
        assert_eq!(second.stats.duplicates_skipped, 2);
        assert_eq!(store.recent("phone", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn start_returns_before_the_run_finishes() {
        let store: DynStore = Arc::new(InMemoryStore::new());
        let p = pipeline(vec![Fixed("reddit", vec![("1", "fine".into())])], store);
        let id = p.start("phone", AnalysisMode::Transformers);
        assert!(p.runs().get(id).is_some());

        for _ in 0..100 {
            if p.runs().get(id).is_some_and(|r| r.state.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let rec = p.runs().get(id).unwrap();
        assert_eq!(rec.state, RunState::Done);
        assert_eq!(rec.stats.items_saved, 1);
        assert_eq!(rec.stats.extraction_calls, 0);
    }

    #[tokio::test]
    async fn evicted_run_still_reports_its_own_outcome() {
        let runs = Arc::new(RunRegistry::with_capacity(1));
        let p = pipeline_with(
            vec![Arc::new(Crowding(runs.clone()))],
            Arc::new(Unreachable),
            runs.clone(),
        );
        let rec = p.run("phone", AnalysisMode::Transformers).await;
        assert!(runs.get(rec.run_id).is_none());
        match rec.state {
            RunState::Failed { reason } => assert!(reason.contains("storage unavailable")),
            other => panic!("expected failed run, got {other:?}"),
        }
        assert_eq!(rec.stats.items_retrieved, 1);
    }

    #[tokio::test]
    async fn failed_run_keeps_partial_stats() {
        let p = pipeline(
            vec![Fixed("reddit", vec![("1", "fine".into())])],
            Arc::new(Unreachable),
        );
        let rec = p.run("phone", AnalysisMode::Transformers).await;
        assert!(matches!(rec.state, RunState::Failed { .. }));
        assert_eq!(rec.stats.items_retrieved, 1);
        assert_eq!(rec.stats.fast_calls, 1);
    }
}
