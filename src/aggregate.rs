// src/aggregate.rs
//! Read-side views over persisted FeedItems for one query and time window:
//! distribution, trend buckets, aspect word cloud, recent feed, polarity
//! summaries and per-product comparison.

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::analyze::summary::{SummaryOutcome, SummaryService};
use crate::analyze::types::SentimentLabel;
use crate::error::Result;
use crate::store::{DynStore, FeedFilter, FeedItem};

pub const WORDCLOUD_LIMIT: usize = 50;
pub const DEFAULT_SAMPLE_SIZE: usize = 25;
pub const DEFAULT_FEED_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[default]
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::Day => "24h",
            Self::Week => "7d",
        }
    }

    pub fn window(self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::hours(24),
            Self::Week => Duration::days(7),
        }
    }

    /// Trend bucket width: minutes for the last hour, hours otherwise.
    pub fn bucket(self) -> Duration {
        match self {
            Self::Hour => Duration::minutes(1),
            Self::Day | Self::Week => Duration::hours(1),
        }
    }

    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Self::Hour),
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            other => Err(format!("unsupported time range '{other}' (expected 1h, 24h or 7d)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl Distribution {
    fn add(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket start, RFC-3339 UTC.
    pub timestamp: String,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    pub text: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub positive_summary: SummaryOutcome,
    pub negative_summary: SummaryOutcome,
    pub positive_docs: usize,
    pub negative_docs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTrend {
    pub product_name: String,
    pub trends: Vec<TrendPoint>,
}

pub fn distribution(items: &[FeedItem]) -> Distribution {
    let mut d = Distribution::default();
    for it in items {
        d.add(it.analysis.sentiment);
    }
    d
}

/// Per-bucket distribution, ascending; buckets without items are omitted.
pub fn trends(items: &[FeedItem], range: TimeRange) -> Vec<TrendPoint> {
    let width = range.bucket();
    let mut buckets: BTreeMap<DateTime<Utc>, Distribution> = BTreeMap::new();
    for it in items {
        let start = it.timestamp.duration_trunc(width).unwrap_or(it.timestamp);
        buckets.entry(start).or_default().add(it.analysis.sentiment);
    }
    buckets
        .into_iter()
        .map(|(start, d)| TrendPoint {
            timestamp: start.to_rfc3339_opts(SecondsFormat::Secs, true),
            positive: d.positive,
            negative: d.negative,
            neutral: d.neutral,
        })
        .collect()
}

/// Aspect frequencies, highest first; equal counts ordered by name.
pub fn word_cloud(items: &[FeedItem], limit: usize) -> Vec<WordCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for it in items {
        for a in &it.analysis.aspects {
            if !a.name.is_empty() {
                *counts.entry(a.name.as_str()).or_default() += 1;
            }
        }
    }
    let mut out: Vec<WordCount> = counts
        .into_iter()
        .map(|(text, value)| WordCount {
            text: text.to_string(),
            value,
        })
        .collect();
    out.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.text.cmp(&b.text)));
    out.truncate(limit);
    out
}

pub struct AggregationService {
    store: DynStore,
    summaries: Arc<SummaryService>,
}

impl AggregationService {
    pub fn new(store: DynStore, summaries: Arc<SummaryService>) -> Self {
        Self { store, summaries }
    }

    async fn window(&self, filter: &FeedFilter, range: TimeRange) -> Result<Vec<FeedItem>> {
        self.store.query(filter, range.since(Utc::now())).await
    }

    pub async fn distribution(&self, query: &str, range: TimeRange) -> Result<Distribution> {
        let items = self.window(&FeedFilter::query(query), range).await?;
        let d = distribution(&items);
        if d.total() == 0 {
            tracing::debug!(target: "aggregate", query, range = range.as_str(), "no items in window");
        }
        Ok(d)
    }

    pub async fn trends(&self, query: &str, range: TimeRange) -> Result<Vec<TrendPoint>> {
        let items = self.window(&FeedFilter::query(query), range).await?;
        Ok(trends(&items, range))
    }

    pub async fn word_cloud(&self, query: &str, range: TimeRange) -> Result<Vec<WordCount>> {
        let items = self.window(&FeedFilter::query(query), range).await?;
        Ok(word_cloud(&items, WORDCLOUD_LIMIT))
    }

    pub async fn feed(&self, query: &str, limit: usize) -> Result<Vec<FeedItem>> {
        self.store.recent(query, limit).await
    }

    /// Texts of up to `sample_size` items of one polarity in the window.
    pub async fn sample(
        &self,
        query: &str,
        label: SentimentLabel,
        range: TimeRange,
        sample_size: usize,
    ) -> Result<Vec<String>> {
        let filter = FeedFilter::query(query).with_label(label);
        let items = self.window(&filter, range).await?;
        Ok(items
            .into_iter()
            .take(sample_size)
            .map(|it| it.text)
            .collect())
    }

    /// `Ok(None)` when the window holds neither positive nor negative items.
    pub async fn summary(
        &self,
        query: &str,
        range: TimeRange,
        sample_size: usize,
    ) -> Result<Option<SummaryReport>> {
        let positive = self
            .sample(query, SentimentLabel::Positive, range, sample_size)
            .await?;
        let negative = self
            .sample(query, SentimentLabel::Negative, range, sample_size)
            .await?;
        if positive.is_empty() && negative.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            target: "aggregate",
            query,
            positive = positive.len(),
            negative = negative.len(),
            provider = self.summaries.provider_name(),
            "summarizing samples"
        );
        let (pos, neg) = futures::join!(
            self.summaries.summarize(&positive, SentimentLabel::Positive),
            self.summaries.summarize(&negative, SentimentLabel::Negative),
        );
        Ok(Some(SummaryReport {
            positive_summary: pos,
            negative_summary: neg,
            positive_docs: positive.len(),
            negative_docs: negative.len(),
        }))
    }

    pub async fn comparison(&self, products: &[String], range: TimeRange) -> Result<Vec<ProductTrend>> {
        let all = futures::future::try_join_all(
            products.iter().map(|p| self.trends(p, range)),
        )
        .await?;
        Ok(products
            .iter()
            .cloned()
            .zip(all)
            .map(|(product_name, trends)| ProductTrend {
                product_name,
                trends,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{DisabledClient, MockSummarizer};
    use crate::store::test_support::feed_item;
    use crate::store::{FeedStore, InMemoryStore};

    fn service(store: DynStore) -> AggregationService {
        AggregationService::new(store, Arc::new(SummaryService::new(Arc::new(MockSummarizer))))
    }

    #[test]
    fn parses_only_known_ranges() {
        assert_eq!("1h".parse::<TimeRange>().unwrap(), TimeRange::Hour);
        assert_eq!("7d".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert!("30d".parse::<TimeRange>().is_err());
        assert_eq!(TimeRange::default().as_str(), "24h");
    }

    #[test]
    fn distribution_keeps_zero_counts() {
        let items = vec![
            feed_item("q", "reddit", "1", SentimentLabel::Positive, &[], 1),
            feed_item("q", "reddit", "2", SentimentLabel::Positive, &[], 1),
            feed_item("q", "reddit", "3", SentimentLabel::Positive, &[], 1),
            feed_item("q", "reddit", "4", SentimentLabel::Negative, &[], 1),
        ];
        let d = distribution(&items);
        assert_eq!(
            d,
            Distribution {
                positive: 3,
                negative: 1,
                neutral: 0
            }
        );
        let json = serde_json::to_value(d).unwrap();
        assert_eq!(json["neutral"], 0);
    }

    #[test]
    fn word_cloud_orders_by_count_then_name() {
        let items = vec![
            feed_item("q", "reddit", "1", SentimentLabel::Positive, &["camera"], 1),
            feed_item("q", "reddit", "2", SentimentLabel::Positive, &["camera", "battery"], 1),
            feed_item("q", "reddit", "3", SentimentLabel::Positive, &["screen"], 1),
        ];
        let wc = word_cloud(&items, WORDCLOUD_LIMIT);
        let got: Vec<(&str, usize)> = wc.iter().map(|w| (w.text.as_str(), w.value)).collect();
        assert_eq!(got, vec![("camera", 2), ("battery", 1), ("screen", 1)]);
        assert_eq!(word_cloud(&items, 1).len(), 1);
    }

    #[test]
    fn trend_buckets_are_ascending_and_sparse() {
        let items = vec![
            feed_item("q", "reddit", "1", SentimentLabel::Negative, &[], 1),
            feed_item("q", "reddit", "2", SentimentLabel::Positive, &[], 5),
            feed_item("q", "reddit", "3", SentimentLabel::Positive, &[], 5),
        ];
        let t = trends(&items, TimeRange::Day);
        assert_eq!(t.len(), 2);
        assert!(t[0].timestamp < t[1].timestamp);
        assert_eq!(t[0].positive, 2);
        assert_eq!(t[1].negative, 1);
        assert!(t[0].timestamp.ends_with(":00:00Z"));
    }

    #[tokio::test]
    async fn window_excludes_older_items() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(feed_item("q", "reddit", "1", SentimentLabel::Positive, &[], 2))
            .await
            .unwrap();
        store
            .insert(feed_item("q", "reddit", "2", SentimentLabel::Negative, &[], 30))
            .await
            .unwrap();
        let svc = service(store);
        let day = svc.distribution("q", TimeRange::Day).await.unwrap();
        assert_eq!(day.total(), 1);
        let week = svc.distribution("q", TimeRange::Week).await.unwrap();
        assert_eq!(week.total(), 2);
        assert_eq!(svc.distribution("q", TimeRange::Hour).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn summary_is_none_without_polar_items() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(feed_item("q", "reddit", "1", SentimentLabel::Neutral, &[], 1))
            .await
            .unwrap();
        let svc = service(store);
        assert!(svc.summary("q", TimeRange::Day, 25).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summary_degrades_when_capability_is_off() {
        let store: DynStore = Arc::new(InMemoryStore::new());
        store
            .insert(feed_item("q", "reddit", "1", SentimentLabel::Negative, &[], 1))
            .await
            .unwrap();
        let svc = AggregationService::new(
            store,
            Arc::new(SummaryService::new(Arc::new(DisabledClient))),
        );
        let report = svc.summary("q", TimeRange::Day, 5).await.unwrap().unwrap();
        assert_eq!(report.negative_docs, 1);
        // an empty positive sample needs no capability call
        assert!(matches!(report.positive_summary, SummaryOutcome::Available(_)));
        assert!(matches!(report.negative_summary, SummaryOutcome::Unavailable { .. }));
    }

    #[tokio::test]
    async fn comparison_keeps_product_order() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(feed_item("b", "reddit", "1", SentimentLabel::Positive, &[], 1))
            .await
            .unwrap();
        let svc = service(store);
        let products = vec!["a".to_string(), "b".to_string()];
        let cmp = svc.comparison(&products, TimeRange::Day).await.unwrap();
        assert_eq!(cmp[0].product_name, "a");
        assert!(cmp[0].trends.is_empty());
        assert_eq!(cmp[1].trends.len(), 1);
    }
}
