// src/ingest/providers/twitter.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{http_client, required_env, send_json};
use crate::error::Result;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawItem, SourceAdapter};

const ORIGIN: &str = "twitter";
const SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/recent";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

pub struct TwitterAdapter {
    client: reqwest::Client,
    bearer: String,
}

impl TwitterAdapter {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bearer: required_env(ORIGIN, "TWITTER_BEARER_TOKEN")?,
            client: http_client(ORIGIN)?,
        })
    }
}

/// Recent search only accepts 10..=100.
fn api_max_results(n: usize) -> usize {
    n.clamp(10, 100)
}

fn tweet_to_item(t: Tweet) -> Option<RawItem> {
    let text = normalize_text(&t.text);
    if text.is_empty() {
        return None;
    }
    Some(RawItem {
        origin: ORIGIN.to_string(),
        url: Some(format!("https://x.com/i/web/status/{}", t.id)),
        source_id: t.id,
        text,
        external_timestamp: t.created_at.unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl SourceAdapter for TwitterAdapter {
    fn name(&self) -> &'static str {
        ORIGIN
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let q = format!("{query} -is:retweet lang:en");
        let n = api_max_results(max_results).to_string();
        let req = self
            .client
            .get(SEARCH_URL)
            .bearer_auth(&self.bearer)
            .query(&[
                ("query", q.as_str()),
                ("max_results", n.as_str()),
                ("tweet.fields", "created_at,text"),
            ]);
        let resp: SearchResp = send_json(ORIGIN, req).await?;
        Ok(resp
            .data
            .into_iter()
            .filter_map(tweet_to_item)
            .take(max_results)
            .collect())
    }
}
