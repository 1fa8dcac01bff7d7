// src/analyze/mod.rs
//! Per-item analysis: fast classification always, aspect extraction when the
//! route asks for it (through the limiter), merged into one result.

pub mod ai_adapter;
pub mod cache;
pub mod classifier;
pub mod content_key;
pub mod limiter;
pub mod routing;
pub mod summary;
pub mod types;

use metrics::counter;
use std::sync::Arc;

use crate::analyze::ai_adapter::DynExtractor;
use crate::analyze::classifier::DynClassifier;
use crate::analyze::content_key::ContentKey;
use crate::analyze::limiter::ExtractionLimiter;
use crate::analyze::routing::Route;
use crate::analyze::types::AnalysisResult;

pub use crate::analyze::cache::ResultCache;
pub use crate::analyze::routing::{AnalysisMode, RoutingPolicy};
pub use crate::analyze::types::{Aspect, SentimentLabel};

/// What happened to the extraction leg of one analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    NotRouted,
    Succeeded,
    /// Extraction failed; the fast-only result stands in.
    FellBack(String),
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub extraction: ExtractionStatus,
}

impl AnalysisOutcome {
    /// Only results that completed their routed path are worth memoizing;
    /// a fallback may be upgraded by a later run.
    pub fn cacheable(&self) -> bool {
        !matches!(self.extraction, ExtractionStatus::FellBack(_))
    }
}

pub struct Analyzer {
    classifier: DynClassifier,
    extractor: DynExtractor,
    limiter: Arc<ExtractionLimiter>,
}

impl Analyzer {
    pub fn new(
        classifier: DynClassifier,
        extractor: DynExtractor,
        limiter: Arc<ExtractionLimiter>,
    ) -> Self {
        Self {
            classifier,
            extractor,
            limiter,
        }
    }

    pub fn limiter(&self) -> &ExtractionLimiter {
        &self.limiter
    }

    pub async fn analyze(&self, key: &ContentKey, text: &str, route: Route) -> AnalysisOutcome {
        let c = self.classifier.classify(text).await;
        counter!("analysis_fast_calls_total").increment(1);

        if route == Route::FastOnly {
            return AnalysisOutcome {
                result: AnalysisResult::from_classification(c),
                extraction: ExtractionStatus::NotRouted,
            };
        }

        let extractor = &self.extractor;
        match self.limiter.run(move || extractor.extract(text)).await {
            Ok(x) => AnalysisOutcome {
                result: AnalysisResult::merge(c, x),
                extraction: ExtractionStatus::Succeeded,
            },
            Err(e) => {
                counter!("analysis_extraction_fallbacks_total").increment(1);
                tracing::warn!(
                    target: "analysis",
                    key = key.short(),
                    provider = extractor.provider_name(),
                    error = %e,
                    "extraction failed, using fast-only result"
                );
                AnalysisOutcome {
                    result: AnalysisResult::from_classification(c),
                    extraction: ExtractionStatus::FellBack(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{AspectExtractor, MockExtractor};
    use crate::analyze::classifier::LexiconClassifier;
    use crate::analyze::types::{AnalysisMethod, Extraction};
    use crate::config::RetryPolicy;
    use crate::error::{PipelineError, Result};
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    struct Malformed;

    impl AspectExtractor for Malformed {
        fn extract<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Extraction>> + Send + 'a>> {
            Box::pin(async { Err(PipelineError::CapabilityMalformed("garbage".into())) })
        }
        fn provider_name(&self) -> &'static str {
            "malformed"
        }
    }

    fn analyzer(extractor: DynExtractor) -> Analyzer {
        Analyzer::new(
            Arc::new(LexiconClassifier::new()),
            extractor,
            Arc::new(ExtractionLimiter::new(
                2,
                RetryPolicy::default(),
                Duration::from_secs(5),
            )),
        )
    }

    #[tokio::test]
    async fn fast_only_route_skips_extractor() {
        let a = analyzer(Arc::new(Malformed));
        let text = "The battery is great";
        let out = a.analyze(&ContentKey::of(text), text, Route::FastOnly).await;
        assert_eq!(out.extraction, ExtractionStatus::NotRouted);
        assert_eq!(out.result.method, AnalysisMethod::Fast);
        assert!(out.result.aspects.is_empty());
        assert_eq!(a.limiter().peak(), 0);
    }

    #[tokio::test]
    async fn extract_route_merges_aspects() {
        let a = analyzer(Arc::new(MockExtractor::new(vec!["battery".into()])));
        let text = "The battery is great";
        let out = a
            .analyze(&ContentKey::of(text), text, Route::FastPlusExtract)
            .await;
        assert_eq!(out.extraction, ExtractionStatus::Succeeded);
        assert_eq!(out.result.sentiment, SentimentLabel::Positive);
        assert_eq!(out.result.aspects[0].name, "battery");
        assert!(out.cacheable());
    }

    #[tokio::test]
    async fn malformed_extraction_degrades_to_fast_only() {
        let a = analyzer(Arc::new(Malformed));
        let text = "The battery is terrible";
        let out = a
            .analyze(&ContentKey::of(text), text, Route::FastPlusExtract)
            .await;
        assert!(matches!(out.extraction, ExtractionStatus::FellBack(_)));
        assert_eq!(out.result.method, AnalysisMethod::Fast);
        assert!(out.result.aspects.is_empty());
        assert_eq!(out.result.sentiment, SentimentLabel::Negative);
        assert!(!out.cacheable());
    }
}
