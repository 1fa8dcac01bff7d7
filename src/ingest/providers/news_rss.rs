// src/ingest/providers/news_rss.rs
//! Keyless Google News RSS search. Also constructible from an XML fixture.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::{PipelineError, Result};
use crate::ingest::normalize_text;
use crate::ingest::types::{RawItem, SourceAdapter};

const ORIGIN: &str = "news_rss";
const SEARCH_URL: &str = "https://news.google.com/rss/search";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0)
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

pub struct GoogleNewsRssAdapter {
    mode: Mode,
}

impl GoogleNewsRssAdapter {
    /// Enabled unless `NEWS_RSS_DISABLED=1`.
    pub fn from_env() -> Result<Self> {
        if std::env::var("NEWS_RSS_DISABLED").ok().as_deref() == Some("1") {
            return Err(PipelineError::source_unavailable(
                ORIGIN,
                "disabled by NEWS_RSS_DISABLED",
            ));
        }
        Ok(Self {
            mode: Mode::Http {
                client: super::http_client(ORIGIN)?,
            },
        })
    }

    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    fn parse_items_from_str(s: &str, max_results: usize) -> Result<Vec<RawItem>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .map_err(|e| PipelineError::source_transient(ORIGIN, format!("parsing rss xml: {e}")))?;

        let mut out = Vec::with_capacity(rss.channel.item.len().min(max_results));
        for it in rss.channel.item {
            if out.len() >= max_results {
                break;
            }
            let parts: Vec<String> = [it.title.as_deref(), it.description.as_deref()]
                .into_iter()
                .flatten()
                .map(normalize_text)
                .filter(|p| !p.is_empty())
                .collect();
            let text = parts.join(". ");
            if text.is_empty() {
                continue;
            }

            let source_id = it
                .guid
                .map(|g| g.value.trim().to_string())
                .filter(|g| !g.is_empty())
                .or_else(|| it.link.clone())
                .unwrap_or_else(|| crate::analyze::content_key::ContentKey::of(&text).to_string());

            out.push(RawItem {
                origin: ORIGIN.to_string(),
                text,
                external_timestamp: it
                    .pub_date
                    .as_deref()
                    .and_then(parse_rfc2822)
                    .unwrap_or_else(Utc::now),
                source_id,
                url: it.link,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("retrieval_rss_parse_ms").record(ms);
        counter!("retrieval_rss_events_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for GoogleNewsRssAdapter {
    fn name(&self) -> &'static str {
        ORIGIN
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, max_results),
            Mode::Http { client } => {
                let resp = client
                    .get(SEARCH_URL)
                    .query(&[
                        ("q", query),
                        ("hl", "en-US"),
                        ("gl", "US"),
                        ("ceid", "US:en"),
                    ])
                    .send()
                    .await
                    .map_err(|e| PipelineError::source_transient(ORIGIN, format!("http: {e}")))?;
                if !resp.status().is_success() {
                    return Err(PipelineError::source_transient(
                        ORIGIN,
                        format!("http status {}", resp.status()),
                    ));
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| PipelineError::source_transient(ORIGIN, format!("body: {e}")))?;
                Self::parse_items_from_str(&body, max_results)
            }
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
