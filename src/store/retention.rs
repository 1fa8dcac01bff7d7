// src/store/retention.rs
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{DynStore, Purge};
use crate::analyze::cache::ResultCache;
use crate::error::Result;

/// Purge FeedItems older than `age_days` (optionally one query only) and drop
/// the cache entries no surviving item references.
pub async fn purge_and_invalidate(
    store: &DynStore,
    cache: &ResultCache,
    query: Option<&str>,
    age_days: u32,
) -> Result<Purge> {
    let purge = store.delete_older_than(query, age_days).await?;
    let invalidated = cache.invalidate(&purge.orphaned_keys);
    counter!("store_items_purged_total").increment(purge.deleted as u64);
    tracing::info!(
        target: "store",
        query = query.unwrap_or("*"),
        age_days,
        deleted = purge.deleted,
        invalidated,
        "retention purge"
    );
    Ok(purge)
}

/// Periodic purge of every query. `interval` of zero disables the task.
pub fn spawn_retention_task(
    store: DynStore,
    cache: Arc<ResultCache>,
    age_days: u32,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!(target: "store", "retention task disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = purge_and_invalidate(&store, &cache, None, age_days).await {
                tracing::warn!(target: "store", error = %e, "retention purge failed");
            }
        }
    }))
}
