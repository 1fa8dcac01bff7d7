// src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

use super::{cutoff_for, FeedFilter, FeedItem, FeedStore, Index, InsertOutcome, Purge};
use crate::error::Result;

/// Process-local store. Default when no `FEED_STORE_PATH` is set.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    index: RwLock<Index>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .items()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedStore for InMemoryStore {
    async fn insert(&self, item: FeedItem) -> Result<InsertOutcome> {
        Ok(self
            .index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item))
    }

    async fn query(&self, filter: &FeedFilter, since: DateTime<Utc>) -> Result<Vec<FeedItem>> {
        Ok(self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .query(filter, since))
    }

    async fn recent(&self, query: &str, limit: usize) -> Result<Vec<FeedItem>> {
        Ok(self
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .recent(query, limit))
    }

    async fn delete_older_than(&self, query: Option<&str>, age_days: u32) -> Result<Purge> {
        Ok(self
            .index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .purge(query, cutoff_for(age_days)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::types::SentimentLabel;
    use crate::store::test_support::feed_item;

    #[tokio::test]
    async fn insert_is_idempotent_per_identity() {
        let s = InMemoryStore::new();
        let it = feed_item("q", "reddit", "1", SentimentLabel::Neutral, &[], 0);
        assert_eq!(s.insert(it.clone()).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(s.insert(it).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(s.len(), 1);
        assert!(s.ping().await.is_ok());
    }
}
