// src/analyze/summary.rs
//! Summarization wrapper: never propagates capability errors, memoizes whole samples.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use super::ai_adapter::{DynSummarizer, SummaryData};
use super::content_key::ContentKey;
use super::types::SentimentLabel;

const MEMO_CAP: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Available(SummaryData),
    Unavailable { reason: String },
}

pub struct SummaryService {
    summarizer: DynSummarizer,
    memo: Mutex<HashMap<ContentKey, SummaryData>>,
}

/// Digest over the polarity and every document of the sample, in order.
fn sample_key(documents: &[String], context: SentimentLabel) -> ContentKey {
    let mut joined = String::from(context.as_str());
    for d in documents {
        joined.push('\u{1f}');
        joined.push_str(d);
    }
    ContentKey::of(&joined)
}

impl SummaryService {
    pub fn new(summarizer: DynSummarizer) -> Self {
        Self {
            summarizer,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.summarizer.provider_name()
    }

    pub async fn summarize(&self, documents: &[String], context: SentimentLabel) -> SummaryOutcome {
        if documents.is_empty() {
            return SummaryOutcome::Available(SummaryData {
                overview: "No documents available for summary.".to_string(),
                key_insights: Vec::new(),
                overall_sentiment: SentimentLabel::Neutral,
            });
        }

        let key = sample_key(documents, context);
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
        {
            return SummaryOutcome::Available(hit);
        }

        match self.summarizer.summarize(documents, context).await {
            Ok(s) => {
                let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
                if memo.len() >= MEMO_CAP {
                    memo.clear();
                }
                memo.insert(key, s.clone());
                SummaryOutcome::Available(s)
            }
            Err(e) => {
                tracing::warn!(
                    target: "aggregate",
                    context = context.as_str(),
                    docs = documents.len(),
                    error = %e,
                    "summary unavailable"
                );
                SummaryOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{DisabledClient, Summarizer};
    use crate::error::Result;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(AtomicUsize);

    impl Summarizer for Counting {
        fn summarize<'a>(
            &'a self,
            documents: &'a [String],
            context: SentimentLabel,
        ) -> Pin<Box<dyn Future<Output = Result<SummaryData>> + Send + 'a>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(SummaryData {
                    overview: format!("{} docs", documents.len()),
                    key_insights: vec![],
                    overall_sentiment: context,
                })
            })
        }
        fn provider_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn same_sample_is_summarized_once() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let svc = SummaryService::new(inner.clone());
        let docs = vec!["a".to_string(), "b".to_string()];
        let first = svc.summarize(&docs, SentimentLabel::Positive).await;
        let second = svc.summarize(&docs, SentimentLabel::Positive).await;
        assert_eq!(first, second);
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
        svc.summarize(&docs, SentimentLabel::Negative).await;
        assert_eq!(inner.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_reported_not_raised() {
        let svc = SummaryService::new(Arc::new(DisabledClient));
        let out = svc
            .summarize(&["x".to_string()], SentimentLabel::Negative)
            .await;
        assert!(matches!(out, SummaryOutcome::Unavailable { .. }));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "unavailable");
    }

    #[tokio::test]
    async fn empty_sample_needs_no_capability() {
        let svc = SummaryService::new(Arc::new(DisabledClient));
        match svc.summarize(&[], SentimentLabel::Positive).await {
            SummaryOutcome::Available(s) => assert!(s.key_insights.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
