// src/analyze/cache.rs
//! Process-lifetime memo of analysis results keyed by ContentKey.
//! Write-once per key: an equal re-put is a no-op, a different one is rejected.

use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::RwLock;

use super::content_key::ContentKey;
use super::types::AnalysisResult;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Unchanged,
}

#[derive(Debug, Default)]
pub struct ResultCache {
    inner: RwLock<HashMap<ContentKey, AnalysisResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ContentKey) -> Option<AnalysisResult> {
        let g = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match g.get(key) {
            Some(r) => {
                counter!("analysis_cache_hits_total").increment(1);
                Some(r.clone())
            }
            None => {
                counter!("analysis_cache_misses_total").increment(1);
                None
            }
        }
    }

    pub fn put(&self, key: ContentKey, result: AnalysisResult) -> Result<PutOutcome> {
        let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = g.get(&key) {
            if *existing == result {
                return Ok(PutOutcome::Unchanged);
            }
            counter!("analysis_cache_conflicts_total").increment(1);
            tracing::warn!(target: "analysis", key = key.short(), "cache conflict rejected");
            return Err(PipelineError::CacheConflict(key.to_string()));
        }
        g.insert(key, result);
        gauge!("analysis_cache_entries").set(g.len() as f64);
        Ok(PutOutcome::Inserted)
    }

    /// Drop the given keys; returns how many were present.
    pub fn invalidate<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a ContentKey>,
    {
        let mut g = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = keys.into_iter().filter(|k| g.remove(*k).is_some()).count();
        gauge!("analysis_cache_entries").set(g.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::types::{Classification, SentimentLabel};

    fn result(label: SentimentLabel) -> AnalysisResult {
        AnalysisResult::from_classification(Classification { label, score: 0.9 })
    }

    #[test]
    fn double_put_is_idempotent() {
        let c = ResultCache::new();
        let k = ContentKey::of("great camera");
        assert_eq!(
            c.put(k.clone(), result(SentimentLabel::Positive)),
            Ok(PutOutcome::Inserted)
        );
        assert_eq!(
            c.put(k.clone(), result(SentimentLabel::Positive)),
            Ok(PutOutcome::Unchanged)
        );
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&k).unwrap().sentiment, SentimentLabel::Positive);
    }

    #[test]
    fn conflicting_put_is_rejected_and_keeps_original() {
        let c = ResultCache::new();
        let k = ContentKey::of("great camera");
        c.put(k.clone(), result(SentimentLabel::Positive)).unwrap();
        let err = c.put(k.clone(), result(SentimentLabel::Negative)).unwrap_err();
        assert!(matches!(err, PipelineError::CacheConflict(_)));
        assert_eq!(c.get(&k).unwrap().sentiment, SentimentLabel::Positive);
    }

    #[test]
    fn invalidate_allows_rederivation() {
        let c = ResultCache::new();
        let a = ContentKey::of("a");
        let b = ContentKey::of("b");
        c.put(a.clone(), result(SentimentLabel::Positive)).unwrap();
        c.put(b.clone(), result(SentimentLabel::Neutral)).unwrap();
        assert_eq!(c.invalidate([&a, &ContentKey::of("zzz")]), 1);
        assert!(c.get(&a).is_none());
        assert!(c.get(&b).is_some());
        c.put(a.clone(), result(SentimentLabel::Negative)).unwrap();
        assert_eq!(c.get(&a).unwrap().sentiment, SentimentLabel::Negative);
    }
}
