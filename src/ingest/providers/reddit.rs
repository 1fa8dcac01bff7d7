// src/ingest/providers/reddit.rs
//! Reddit search across all subreddits (application-only OAuth).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{http_client, required_env, send_json};
use crate::error::Result;
use crate::ingest::normalize_text;
use crate::ingest::types::{RawItem, SourceAdapter};

const ORIGIN: &str = "reddit";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const SEARCH_URL: &str = "https://oauth.reddit.com/search";

#[derive(Debug, Deserialize)]
struct TokenResp {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    permalink: Option<String>,
}

pub struct RedditAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    user_agent: String,
}

impl RedditAdapter {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: required_env(ORIGIN, "REDDIT_CLIENT_ID")?,
            client_secret: required_env(ORIGIN, "REDDIT_CLIENT_SECRET")?,
            user_agent: required_env(ORIGIN, "REDDIT_USER_AGENT")?,
            client: http_client(ORIGIN)?,
        })
    }

    async fn token(&self) -> Result<String> {
        let req = self
            .client
            .post(TOKEN_URL)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let t: TokenResp = send_json(ORIGIN, req).await?;
        Ok(t.access_token)
    }
}

fn post_to_item(p: Post) -> Option<RawItem> {
    let text = if p.selftext.trim().is_empty() {
        normalize_text(&p.title)
    } else {
        normalize_text(&format!("{}. {}", p.title, p.selftext))
    };
    if text.is_empty() {
        return None;
    }
    let ts = DateTime::<Utc>::from_timestamp(p.created_utc as i64, 0).unwrap_or_else(Utc::now);
    Some(RawItem {
        origin: ORIGIN.to_string(),
        text,
        external_timestamp: ts,
        source_id: p.id,
        url: p.permalink.map(|l| format!("https://www.reddit.com{l}")),
    })
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn name(&self) -> &'static str {
        ORIGIN
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let token = self.token().await?;
        let limit = max_results.clamp(1, 100).to_string();
        let req = self
            .client
            .get(SEARCH_URL)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("limit", limit.as_str()),
                ("sort", "relevance"),
                ("type", "link"),
            ]);
        let listing: Listing = send_json(ORIGIN, req).await?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|c| post_to_item(c.data))
            .take(max_results)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_maps_to_items() {
        let json = r#"{"data":{"children":[
            {"data":{"id":"abc","title":"Phone X","selftext":"Battery is &amp; great","created_utc":1700000000.0,"permalink":"/r/x/abc"}},
            {"data":{"id":"def","title":"","selftext":"","created_utc":1700000000.0}}
        ]}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        let items: Vec<RawItem> = listing
            .data
            .children
            .into_iter()
            .filter_map(|c| post_to_item(c.data))
            .collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "abc");
        assert_eq!(items[0].text, "Phone X. Battery is & great");
        assert_eq!(items[0].url.as_deref(), Some("https://www.reddit.com/r/x/abc"));
        assert_eq!(items[0].external_timestamp.timestamp(), 1_700_000_000);
    }

    #[serial_test::serial]
    #[test]
    fn missing_credentials_make_adapter_unavailable() {
        std::env::remove_var("REDDIT_CLIENT_ID");
        let err = RedditAdapter::from_env().err().unwrap();
        assert!(matches!(
            err,
            crate::error::PipelineError::SourceUnavailable { .. }
        ));
    }
}
