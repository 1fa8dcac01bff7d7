// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One mention fetched from an origin. Identity is `(origin, source_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub origin: String, // e.g. "reddit", "youtube"
    pub text: String,   // normalized text
    pub external_timestamp: DateTime<Utc>,
    pub source_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl RawItem {
    pub fn identity(&self) -> (&str, &str) {
        (self.origin.as_str(), self.source_id.as_str())
    }
}

/// Per-origin failure reported next to the merged items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub origin: String,
    pub error: String,
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable origin name, also used as `RawItem::origin`.
    fn name(&self) -> &'static str;
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>>;
}
