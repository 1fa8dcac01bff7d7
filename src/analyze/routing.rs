// src/analyze/routing.rs
//! # Hybrid routing
//! Pure, testable policy mapping `(item, batch index)` → `Route`. No I/O.
//!
//! Rules, first match wins:
//! 1. text of at most `short_text_max_chars` characters → `FastOnly`
//! 2. contains an aspect keyword (case-insensitive substring) → `FastPlusExtract`
//! 3. `index % sample_every == 0` → `FastPlusExtract`
//! 4. otherwise → `FastOnly`

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::PipelineConfig;
use crate::ingest::types::RawItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    FastOnly,
    FastPlusExtract,
}

/// Run-level override of the routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Hybrid,
    /// Every item fast-only.
    Transformers,
    /// Every item fast + extract.
    Llm,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Transformers => "transformers",
            Self::Llm => "llm",
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "transformers" | "transformersonly" | "fast" => Ok(Self::Transformers),
            "llm" | "llmonly" => Ok(Self::Llm),
            other => Err(format!("unknown analysis mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    short_text_max_chars: usize,
    keywords: Vec<String>,
    sample_every: usize,
}

impl RoutingPolicy {
    pub fn new(short_text_max_chars: usize, keywords: Vec<String>, sample_every: usize) -> Self {
        Self {
            short_text_max_chars,
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            sample_every: sample_every.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(
            cfg.short_text_max_chars,
            cfg.aspect_keywords.clone(),
            cfg.sample_every,
        )
    }

    pub fn decide(&self, item: &RawItem, index: usize) -> Route {
        self.decide_text(&item.text, index)
    }

    pub fn decide_text(&self, text: &str, index: usize) -> Route {
        if text.chars().count() <= self.short_text_max_chars {
            return Route::FastOnly;
        }
        let lower = text.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            return Route::FastPlusExtract;
        }
        if index % self.sample_every == 0 {
            return Route::FastPlusExtract;
        }
        Route::FastOnly
    }

    pub fn decide_with_mode(&self, mode: AnalysisMode, item: &RawItem, index: usize) -> Route {
        match mode {
            AnalysisMode::Hybrid => self.decide(item, index),
            AnalysisMode::Transformers => Route::FastOnly,
            AnalysisMode::Llm => Route::FastPlusExtract,
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(text: &str) -> RawItem {
        RawItem {
            origin: "reddit".into(),
            text: text.into(),
            external_timestamp: Utc::now(),
            source_id: "x".into(),
            url: None,
        }
    }

    fn filler(n: usize) -> String {
        "lorem ipsum ".repeat(n / 12 + 1).chars().take(n).collect()
    }

    #[test]
    fn short_text_is_fast_only_regardless_of_keyword_or_index() {
        let p = RoutingPolicy::default();
        let exactly_100 = format!("battery {}", filler(92));
        assert_eq!(exactly_100.chars().count(), 100);
        for idx in 0..6 {
            assert_eq!(p.decide(&item(&exactly_100), idx), Route::FastOnly);
            assert_eq!(p.decide(&item("camera"), idx), Route::FastOnly);
        }
    }

    #[test]
    fn long_text_with_keyword_is_extracted_at_any_index() {
        let p = RoutingPolicy::default();
        let t = format!("{} The BATTERY is fine", filler(120));
        for idx in 0..6 {
            assert_eq!(p.decide(&item(&t), idx), Route::FastPlusExtract);
        }
    }

    #[test]
    fn long_text_without_keyword_is_sampled_every_third() {
        let p = RoutingPolicy::default();
        let t = filler(150);
        let routes: Vec<Route> = (0..6).map(|i| p.decide(&item(&t), i)).collect();
        assert_eq!(
            routes,
            vec![
                Route::FastPlusExtract,
                Route::FastOnly,
                Route::FastOnly,
                Route::FastPlusExtract,
                Route::FastOnly,
                Route::FastOnly,
            ]
        );
    }

    #[test]
    fn decide_is_pure() {
        let p = RoutingPolicy::default();
        let t = filler(300);
        for idx in 0..10 {
            assert_eq!(p.decide(&item(&t), idx), p.decide(&item(&t), idx));
        }
    }

    #[test]
    fn worked_example_from_three_items() {
        let p = RoutingPolicy::default();
        let a = filler(40);
        let b = filler(150);
        let c = format!("{} battery", filler(192));
        assert_eq!(c.chars().count(), 200);
        assert_eq!(p.decide(&item(&a), 0), Route::FastOnly);
        assert_eq!(p.decide(&item(&b), 1), Route::FastOnly);
        assert_eq!(p.decide(&item(&c), 2), Route::FastPlusExtract);
    }

    #[test]
    fn mode_overrides_policy() {
        let p = RoutingPolicy::default();
        let long = item(&filler(150));
        assert_eq!(
            p.decide_with_mode(AnalysisMode::Transformers, &item("battery"), 0),
            Route::FastOnly
        );
        assert_eq!(
            p.decide_with_mode(AnalysisMode::Llm, &item("short"), 1),
            Route::FastPlusExtract
        );
        assert_eq!(p.decide_with_mode(AnalysisMode::Hybrid, &long, 1), Route::FastOnly);
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!(
            "transformersOnly".parse::<AnalysisMode>(),
            Ok(AnalysisMode::Transformers)
        );
        assert_eq!("LLM".parse::<AnalysisMode>(), Ok(AnalysisMode::Llm));
        assert!("turbo".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn zero_sampling_denominator_is_clamped() {
        let p = RoutingPolicy::new(10, vec![], 0);
        assert_eq!(p.decide_text(&filler(50), 7), Route::FastPlusExtract);
    }
}
