// src/ingest/providers/serpapi_news.rs
//! Google News results through SerpApi. Only results with both a snippet and a link are kept.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{http_client, required_env, send_json};
use crate::error::Result;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawItem, SourceAdapter};

const ORIGIN: &str = "google_news";
const SEARCH_URL: &str = "https://serpapi.com/search.json";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    news_results: Vec<NewsResult>,
}

#[derive(Debug, Deserialize)]
struct NewsResult {
    snippet: Option<String>,
    link: Option<String>,
}

pub struct SerpApiNewsAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl SerpApiNewsAdapter {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: required_env(ORIGIN, "SERPAPI_API_KEY")?,
            client: http_client(ORIGIN)?,
        })
    }
}

fn results_to_items(results: Vec<NewsResult>, max_results: usize) -> Vec<RawItem> {
    let now = Utc::now();
    results
        .into_iter()
        .filter_map(|r| {
            let link = r.link?;
            let text = normalize_text(r.snippet.as_deref()?);
            if text.is_empty() {
                return None;
            }
            Some(RawItem {
                origin: ORIGIN.to_string(),
                text,
                // SerpApi dates are relative strings ("2 hours ago"); use fetch time
                external_timestamp: now,
                source_id: link.clone(),
                url: Some(link),
            })
        })
        .take(max_results)
        .collect()
}

#[async_trait]
impl SourceAdapter for SerpApiNewsAdapter {
    fn name(&self) -> &'static str {
        ORIGIN
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let n = max_results.to_string();
        let req = self.client.get(SEARCH_URL).query(&[
            ("engine", "google_news"),
            ("q", query),
            ("num", n.as_str()),
            ("api_key", self.api_key.as_str()),
        ]);
        let resp: SearchResp = send_json(ORIGIN, req).await?;
        Ok(results_to_items(resp.news_results, max_results))
    }
}
