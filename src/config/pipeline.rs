// src/config/pipeline.rs
//! Pipeline policy constants, loaded from TOML.
//!
//! Lookup order:
//! 1) $PIPELINE_CONFIG_PATH (must exist)
//! 2) config/pipeline.toml
//! 3) built-in defaults
//!
//! Every field is optional in the file; out-of-range values are reset to defaults.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";

fn default_aspect_keywords() -> Vec<String> {
    [
        "battery",
        "screen",
        "performance",
        "design",
        "price",
        "quality",
        "durability",
        "camera",
        "software",
        "features",
        "support",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Capped exponential backoff for rate-limited extraction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Texts at or under this many characters never go to the extractor.
    pub short_text_max_chars: usize,
    /// Case-insensitive substrings that route long texts to extraction.
    pub aspect_keywords: Vec<String>,
    /// Sampling denominator: every Nth item of a batch (0-indexed) is extracted.
    pub sample_every: usize,
    pub max_concurrent_extractions: usize,
    pub max_results_per_source: usize,
    pub adapter_timeout_ms: u64,
    pub extraction_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub summary_doc_chars: usize,
    pub summary_max_docs: usize,
    pub retention_days: u32,
    /// 0 disables the background retention task.
    pub retention_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            short_text_max_chars: 100,
            aspect_keywords: default_aspect_keywords(),
            sample_every: 3,
            max_concurrent_extractions: 5,
            max_results_per_source: 20,
            adapter_timeout_ms: 15_000,
            extraction_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            summary_doc_chars: 100,
            summary_max_docs: 20,
            retention_days: 30,
            retention_interval_secs: 24 * 3600,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config toml")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path"
                ));
            }
            return Self::load_from(&pb);
        }
        let p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default())
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    fn sanitized(mut self) -> Self {
        let d = Self::default();
        if self.sample_every == 0 {
            self.sample_every = d.sample_every;
        }
        if self.max_concurrent_extractions == 0 {
            self.max_concurrent_extractions = d.max_concurrent_extractions;
        }
        if self.max_results_per_source == 0 {
            self.max_results_per_source = d.max_results_per_source;
        }
        if self.adapter_timeout_ms == 0 {
            self.adapter_timeout_ms = d.adapter_timeout_ms;
        }
        if self.extraction_timeout_ms == 0 {
            self.extraction_timeout_ms = d.extraction_timeout_ms;
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = 1;
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            std::mem::swap(&mut self.retry.base_delay_ms, &mut self.retry.max_delay_ms);
        }
        if self.retention_days == 0 {
            self.retention_days = d.retention_days;
        }
        if self.summary_max_docs == 0 {
            self.summary_max_docs = d.summary_max_docs;
        }
        if self.summary_doc_chars == 0 {
            self.summary_doc_chars = d.summary_doc_chars;
        }

        // keyword matching is case-insensitive: store lowercase, drop blanks and repeats
        let mut kws: Vec<String> = self
            .aspect_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let mut seen = std::collections::HashSet::new();
        kws.retain(|k| seen.insert(k.clone()));
        self.aspect_keywords = kws;
        self
    }
}
