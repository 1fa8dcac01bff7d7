// src/services.rs
//! Explicitly constructed service graph. Built once per process and handed
//! to the router and binaries by `Arc`; nothing below reaches for globals.

use anyhow::Context;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregate::AggregationService;
use crate::analyze::ai_adapter::{build_capabilities, Capabilities};
use crate::analyze::classifier::{DynClassifier, LexiconClassifier};
use crate::analyze::limiter::ExtractionLimiter;
use crate::analyze::summary::SummaryService;
use crate::analyze::{Analyzer, ResultCache, RoutingPolicy};
use crate::config::{AiConfig, PipelineConfig};
use crate::ingest::RetrievalOrchestrator;
use crate::pipeline::{Pipeline, RunRegistry};
use crate::store::jsonl::{JsonlStore, ENV_FEED_STORE_PATH};
use crate::store::retention::spawn_retention_task;
use crate::store::{DynStore, InMemoryStore};

pub struct AppServices {
    pub config: PipelineConfig,
    pub pipeline: Arc<Pipeline>,
    pub aggregation: Arc<AggregationService>,
    pub store: DynStore,
    pub cache: Arc<ResultCache>,
    pub runs: Arc<RunRegistry>,
    pub sources: Vec<&'static str>,
    pub extractor: &'static str,
}

impl AppServices {
    /// Wire the graph from already-built parts; tests inject stubs here.
    pub fn assemble(
        config: PipelineConfig,
        orchestrator: RetrievalOrchestrator,
        classifier: DynClassifier,
        capabilities: Capabilities,
        store: DynStore,
    ) -> Self {
        let limiter = Arc::new(ExtractionLimiter::new(
            config.max_concurrent_extractions,
            config.retry,
            config.extraction_timeout(),
        ));
        let extractor = capabilities.extractor.provider_name();
        let analyzer = Arc::new(Analyzer::new(classifier, capabilities.extractor, limiter));
        let cache = Arc::new(ResultCache::new());
        let runs = Arc::new(RunRegistry::default());
        let sources = orchestrator.adapter_names();

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(orchestrator),
            analyzer,
            Arc::clone(&cache),
            RoutingPolicy::from_config(&config),
            store.clone(),
            Arc::clone(&runs),
        ));
        let aggregation = Arc::new(AggregationService::new(
            store.clone(),
            Arc::new(SummaryService::new(capabilities.summarizer)),
        ));

        Self {
            config,
            pipeline,
            aggregation,
            store,
            cache,
            runs,
            sources,
            extractor,
        }
    }

    /// Configs from disk, credentials and storage choice from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = PipelineConfig::load_default().context("loading pipeline config")?;
        let ai = AiConfig::load_default().context("loading AI config")?;
        // Safe diagnostics: provider + enabled + key length only
        info!(
            provider = %ai.provider,
            enabled = ai.enabled,
            key_len = ai.api_key.len(),
            "AI config loaded"
        );

        let store = open_store()?;
        let orchestrator =
            RetrievalOrchestrator::from_env(config.adapter_timeout(), config.max_results_per_source);
        let capabilities = build_capabilities(&ai, &config);

        let svc = Self::assemble(
            config,
            orchestrator,
            Arc::new(LexiconClassifier::new()),
            capabilities,
            store,
        );
        info!(
            sources = ?svc.sources,
            extractor = svc.extractor,
            store = svc.store.kind(),
            "services ready"
        );
        Ok(svc)
    }

    /// Process-wide instance, built on first use. Concurrent first callers
    /// block on the same initialization; a failed build is retried next call.
    pub fn shared() -> anyhow::Result<Arc<Self>> {
        static SHARED: OnceCell<Arc<AppServices>> = OnceCell::new();
        if let Some(s) = SHARED.get() {
            return Ok(Arc::clone(s));
        }
        SHARED
            .get_or_try_init(|| Self::from_env().map(Arc::new))
            .map(Arc::clone)
    }

    pub fn spawn_retention(&self) -> Option<JoinHandle<()>> {
        spawn_retention_task(
            self.store.clone(),
            Arc::clone(&self.cache),
            self.config.retention_days,
            std::time::Duration::from_secs(self.config.retention_interval_secs),
        )
    }
}

fn open_store() -> anyhow::Result<DynStore> {
    match std::env::var(ENV_FEED_STORE_PATH) {
        Ok(p) if !p.trim().is_empty() => {
            let s = JsonlStore::open(p.trim()).context("opening feed store")?;
            Ok(Arc::new(s))
        }
        _ => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::disabled;

    #[tokio::test]
    async fn assembled_services_share_store_and_cache() {
        let store: DynStore = Arc::new(InMemoryStore::new());
        let svc = AppServices::assemble(
            PipelineConfig::default(),
            RetrievalOrchestrator::new(std::time::Duration::from_secs(1), 5),
            Arc::new(LexiconClassifier::new()),
            disabled(),
            store.clone(),
        );
        assert!(Arc::ptr_eq(&svc.store, &store));
        assert!(std::ptr::eq(svc.pipeline.cache(), svc.cache.as_ref()));
        assert!(svc.sources.is_empty());
        assert_eq!(svc.extractor, "disabled");

        let rec = svc
            .pipeline
            .run("nothing", crate::analyze::AnalysisMode::Hybrid)
            .await;
        assert_eq!(rec.stats.items_retrieved, 0);
        assert_eq!(svc.runs.len(), 1);
    }

    #[serial_test::serial]
    #[test]
    fn store_follows_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        std::env::set_var(ENV_FEED_STORE_PATH, &path);
        let s = open_store().unwrap();
        assert_eq!(s.kind(), "jsonl");
        std::env::remove_var(ENV_FEED_STORE_PATH);
        assert_eq!(open_store().unwrap().kind(), "memory");
    }
}
