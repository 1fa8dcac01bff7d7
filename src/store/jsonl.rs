// src/store/jsonl.rs
//! Append-only JSON-lines file with an in-memory index.
//! Purges rewrite the file atomically (tmp + rename).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{cutoff_for, FeedFilter, FeedItem, FeedStore, Index, InsertOutcome, Purge};
use crate::error::{PipelineError, Result};

pub const ENV_FEED_STORE_PATH: &str = "FEED_STORE_PATH";

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    index: Mutex<Index>,
}

impl JsonlStore {
    /// Open (or create) the file and load every parseable line.
    /// Unparseable lines are skipped with a warning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                PipelineError::StorageUnavailable(format!("{}: {e}", dir.display()))
            })?;
        }
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(PipelineError::StorageUnavailable(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };

        let mut items = Vec::new();
        let mut skipped = 0usize;
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<FeedItem>(line) {
                Ok(it) => items.push(it),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(target: "store", path = %path.display(), skipped, "skipped unreadable feed lines");
        }
        tracing::info!(target: "store", path = %path.display(), items = items.len(), "jsonl store opened");

        Ok(Self {
            path,
            index: Mutex::new(Index::from_items(items)),
        })
    }

    fn append_line(&self, item: &FeedItem) -> Result<()> {
        let line = serde_json::to_string(item)
            .map_err(|e| PipelineError::StorageWriteFailed(format!("encode: {e}")))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::StorageWriteFailed(format!("{}: {e}", self.path.display())))?;
        writeln!(f, "{line}")
            .map_err(|e| PipelineError::StorageWriteFailed(format!("{}: {e}", self.path.display())))
    }

    fn rewrite(&self, items: &[FeedItem]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for it in items {
            let line = serde_json::to_string(it)
                .map_err(|e| PipelineError::StorageWriteFailed(format!("encode: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let io_err = |e: std::io::Error| PipelineError::StorageWriteFailed(format!("compact: {e}"));
        let mut f = fs::File::create(&tmp).map_err(io_err)?;
        f.write_all(buf.as_bytes()).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl FeedStore for JsonlStore {
    async fn insert(&self, item: FeedItem) -> Result<InsertOutcome> {
        let mut ix = self.index.lock().unwrap_or_else(|e| e.into_inner());
        if ix.contains(&item) {
            return Ok(InsertOutcome::Duplicate);
        }
        // file first: a failed append must not leave a phantom index entry
        self.append_line(&item)?;
        Ok(ix.insert(item))
    }

    async fn query(&self, filter: &FeedFilter, since: DateTime<Utc>) -> Result<Vec<FeedItem>> {
        Ok(self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .query(filter, since))
    }

    async fn recent(&self, query: &str, limit: usize) -> Result<Vec<FeedItem>> {
        Ok(self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(query, limit))
    }

    async fn delete_older_than(&self, query: Option<&str>, age_days: u32) -> Result<Purge> {
        let mut ix = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = ix.clone();
        let purge = next.purge(query, cutoff_for(age_days));
        if purge.deleted > 0 {
            // index and file change together or not at all
            self.rewrite(next.items())?;
            *ix = next;
        }
        Ok(purge)
    }

    async fn ping(&self) -> Result<()> {
        match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) if !dir.is_dir() => Err(PipelineError::StorageUnavailable(format!(
                "{} is not a directory",
                dir.display()
            ))),
            _ => Ok(()),
        }
    }

    fn kind(&self) -> &'static str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::types::SentimentLabel;
    use crate::store::test_support::feed_item;

    #[tokio::test]
    async fn survives_reopen_and_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        {
            let s = JsonlStore::open(&path).unwrap();
            s.insert(feed_item("q", "reddit", "1", SentimentLabel::Positive, &["camera"], 1))
                .await
                .unwrap();
            s.insert(feed_item("q", "reddit", "2", SentimentLabel::Negative, &[], 1))
                .await
                .unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{not json").unwrap();

        let s = JsonlStore::open(&path).unwrap();
        let all = s.recent("q", 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            s.insert(feed_item("q", "reddit", "1", SentimentLabel::Positive, &[], 1))
                .await
                .unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn purge_compacts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("feed.jsonl");
        let s = JsonlStore::open(&path).unwrap();
        s.insert(feed_item("q", "reddit", "old", SentimentLabel::Positive, &[], 24 * 60))
            .await
            .unwrap();
        s.insert(feed_item("q", "reddit", "new", SentimentLabel::Positive, &[], 1))
            .await
            .unwrap();

        let p = s.delete_older_than(None, 30).await.unwrap();
        assert_eq!(p.deleted, 1);
        assert_eq!(p.orphaned_keys.len(), 1);

        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 1);
        assert!(lines.contains("\"new\""));
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn failed_compaction_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.jsonl");
        let s = JsonlStore::open(&path).unwrap();
        s.insert(feed_item("q", "reddit", "old", SentimentLabel::Negative, &[], 24 * 60))
            .await
            .unwrap();
        fs::create_dir(path.with_extension("jsonl.tmp")).unwrap();

        let err = s.delete_older_than(None, 30).await.unwrap_err();
        assert!(matches!(err, PipelineError::StorageWriteFailed(_)));
        assert_eq!(s.recent("q", 10).await.unwrap().len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
