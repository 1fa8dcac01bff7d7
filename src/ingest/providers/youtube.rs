// src/ingest/providers/youtube.rs
//! Top-level comments on the videos matching a query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;

use super::{http_client, required_env, send_json};
use crate::error::Result;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawItem, SourceAdapter};

const ORIGIN: &str = "youtube";
const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const COMMENTS_URL: &str = "https://www.googleapis.com/youtube/v3/commentThreads";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: VideoId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadsResp {
    #[serde(default)]
    items: Vec<Thread>,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
    snippet: ThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    text_display: String,
    published_at: Option<DateTime<Utc>>,
}

pub struct YouTubeAdapter {
    client: reqwest::Client,
    api_key: String,
}

/// (videos to search, comments per video) for a requested item budget.
fn split_budget(max_results: usize, found_videos: usize) -> (usize, usize) {
    let videos = (max_results / 5).max(1);
    let per_video = if found_videos == 0 {
        0
    } else {
        (max_results / found_videos).max(1)
    };
    (videos, per_video)
}

impl YouTubeAdapter {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: required_env(ORIGIN, "YOUTUBE_API_KEY")?,
            client: http_client(ORIGIN)?,
        })
    }

    async fn comments_for(&self, video_id: &str, per_video: usize) -> Result<Vec<RawItem>> {
        let n = per_video.clamp(1, 100).to_string();
        let req = self.client.get(COMMENTS_URL).query(&[
            ("part", "snippet"),
            ("videoId", video_id),
            ("maxResults", n.as_str()),
            ("textFormat", "plainText"),
            ("key", self.api_key.as_str()),
        ]);
        let resp: ThreadsResp = send_json(ORIGIN, req).await?;
        Ok(resp
            .items
            .into_iter()
            .filter_map(|t| thread_to_item(t, video_id))
            .collect())
    }
}

fn thread_to_item(t: Thread, video_id: &str) -> Option<RawItem> {
    let c = t.snippet.top_level_comment.snippet;
    let text = normalize_text(&c.text_display);
    if text.is_empty() {
        return None;
    }
    Some(RawItem {
        origin: ORIGIN.to_string(),
        text,
        external_timestamp: c.published_at.unwrap_or_else(Utc::now),
        source_id: t.id,
        url: Some(format!("https://www.youtube.com/watch?v={video_id}")),
    })
}

#[async_trait]
impl SourceAdapter for YouTubeAdapter {
    fn name(&self) -> &'static str {
        ORIGIN
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let (videos, _) = split_budget(max_results, 0);
        let n = videos.to_string();
        let req = self.client.get(SEARCH_URL).query(&[
            ("part", "id"),
            ("q", query),
            ("maxResults", n.as_str()),
            ("type", "video"),
            ("key", self.api_key.as_str()),
        ]);
        let search: SearchResp = send_json(ORIGIN, req).await?;
        let ids: Vec<String> = search.items.into_iter().filter_map(|i| i.id.video_id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (_, per_video) = split_budget(max_results, ids.len());
        let fetched = join_all(ids.iter().map(|id| self.comments_for(id, per_video))).await;
        Ok(merge_comments(&ids, fetched, max_results))
    }
}

/// Concatenate per-video comments in search order. A failed video (comments
/// disabled, quota) is skipped.
fn merge_comments(
    ids: &[String],
    fetched: Vec<Result<Vec<RawItem>>>,
    max_results: usize,
) -> Vec<RawItem> {
    let mut out = Vec::new();
    for (id, res) in ids.iter().zip(fetched) {
        match res {
            Ok(mut v) => out.append(&mut v),
            Err(e) => {
                tracing::debug!(target: "retrieval", origin = ORIGIN, video = %id, error = %e, "comment fetch skipped")
            }
        }
    }
    out.truncate(max_results);
    out
}
