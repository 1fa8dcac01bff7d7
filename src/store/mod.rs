// src/store/mod.rs
//! Persisted FeedItems and the query contract the aggregation side reads through.

pub mod jsonl;
pub mod memory;
pub mod retention;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::analyze::content_key::ContentKey;
use crate::analyze::types::{AnalysisResult, SentimentLabel};
use crate::error::Result;
use crate::ingest::types::RawItem;

pub use jsonl::JsonlStore;
pub use memory::InMemoryStore;

/// RawItem + AnalysisResult + query, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub query: String,
    pub origin: String,
    pub source_id: String,
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Time reported by the origin; windows and retention key on it.
    pub timestamp: DateTime<Utc>,
    pub analyzed_at: DateTime<Utc>,
    pub content_key: ContentKey,
    pub analysis: AnalysisResult,
}

impl FeedItem {
    pub fn new(query: &str, raw: RawItem, key: ContentKey, analysis: AnalysisResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            origin: raw.origin,
            source_id: raw.source_id,
            text: raw.text,
            url: raw.url,
            timestamp: raw.external_timestamp,
            analyzed_at: Utc::now(),
            content_key: key,
            analysis,
        }
    }

    /// Idempotent persistence key.
    pub fn identity(&self) -> (String, String, String) {
        (
            self.query.clone(),
            self.origin.clone(),
            self.source_id.clone(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub query: String,
    pub label: Option<SentimentLabel>,
}

impl FeedFilter {
    pub fn query(q: &str) -> Self {
        Self {
            query: q.to_string(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: SentimentLabel) -> Self {
        self.label = Some(label);
        self
    }

    fn matches(&self, it: &FeedItem, since: DateTime<Utc>) -> bool {
        it.query == self.query
            && it.timestamp >= since
            && self.label.map_or(true, |l| it.analysis.sentiment == l)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same (query, origin, source_id) already stored; nothing written.
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Purge {
    pub deleted: usize,
    /// Keys of deleted items that no remaining item references.
    pub orphaned_keys: Vec<ContentKey>,
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn insert(&self, item: FeedItem) -> Result<InsertOutcome>;
    /// Matching items with `timestamp >= since`, oldest first.
    async fn query(&self, filter: &FeedFilter, since: DateTime<Utc>) -> Result<Vec<FeedItem>>;
    /// Newest `limit` items for a query regardless of age.
    async fn recent(&self, query: &str, limit: usize) -> Result<Vec<FeedItem>>;
    /// Delete items older than `age_days`; `None` purges every query.
    async fn delete_older_than(&self, query: Option<&str>, age_days: u32) -> Result<Purge>;
    async fn ping(&self) -> Result<()>;
    fn kind(&self) -> &'static str;
}

pub type DynStore = Arc<dyn FeedStore>;

pub fn cutoff_for(age_days: u32) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(i64::from(age_days))
}

/// Shared in-memory index used by both store implementations.
#[derive(Debug, Default, Clone)]
pub(crate) struct Index {
    items: Vec<FeedItem>,
    ids: HashSet<(String, String, String)>,
}

impl Index {
    pub(crate) fn from_items(items: Vec<FeedItem>) -> Self {
        let mut ix = Self::default();
        for it in items {
            ix.insert(it);
        }
        ix
    }

    pub(crate) fn contains(&self, it: &FeedItem) -> bool {
        self.ids.contains(&it.identity())
    }

    pub(crate) fn insert(&mut self, it: FeedItem) -> InsertOutcome {
        if !self.ids.insert(it.identity()) {
            return InsertOutcome::Duplicate;
        }
        self.items.push(it);
        InsertOutcome::Inserted
    }

    pub(crate) fn query(&self, filter: &FeedFilter, since: DateTime<Utc>) -> Vec<FeedItem> {
        let mut out: Vec<FeedItem> = self
            .items
            .iter()
            .filter(|it| filter.matches(it, since))
            .cloned()
            .collect();
        out.sort_by_key(|it| it.timestamp);
        out
    }

    pub(crate) fn recent(&self, query: &str, limit: usize) -> Vec<FeedItem> {
        let mut out: Vec<FeedItem> = self
            .items
            .iter()
            .filter(|it| it.query == query)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        out
    }

    /// Remove matching old items; returns the purge summary.
    pub(crate) fn purge(&mut self, query: Option<&str>, cutoff: DateTime<Utc>) -> Purge {
        let (gone, kept): (Vec<FeedItem>, Vec<FeedItem>) =
            std::mem::take(&mut self.items).into_iter().partition(|it| {
                it.timestamp < cutoff && query.map_or(true, |q| it.query == q)
            });
        for it in &gone {
            self.ids.remove(&it.identity());
        }
        self.items = kept;

        let live: HashSet<&ContentKey> = self.items.iter().map(|it| &it.content_key).collect();
        let mut orphaned: Vec<ContentKey> = gone
            .iter()
            .map(|it| it.content_key.clone())
            .filter(|k| !live.contains(k))
            .collect();
        orphaned.sort();
        orphaned.dedup();

        Purge {
            deleted: gone.len(),
            orphaned_keys: orphaned,
        }
    }

    pub(crate) fn items(&self) -> &[FeedItem] {
        &self.items
    }
}
