// src/ingest/providers/mod.rs
pub mod news_rss;
pub mod reddit;
pub mod serpapi_news;
pub mod twitter;
pub mod youtube;

use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) const USER_AGENT: &str =
    "product-sentiment-analyzer/0.1 (+https://github.com/product-sentiment-analyzer)";

/// Shared client settings for all source adapters.
pub(crate) fn http_client(origin: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| PipelineError::source_unavailable(origin, format!("http client: {e}")))
}

/// Read a required env var; empty counts as missing.
pub(crate) fn required_env(origin: &str, key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(PipelineError::source_unavailable(
            origin,
            format!("missing {key}"),
        )),
    }
}

/// Send, check status, decode JSON. Every failure is transient for this run.
pub(crate) async fn send_json<T: DeserializeOwned>(
    origin: &str,
    req: reqwest::RequestBuilder,
) -> Result<T> {
    let resp = req
        .send()
        .await
        .map_err(|e| PipelineError::source_transient(origin, format!("http: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(PipelineError::source_transient(
            origin,
            format!("http status {status}"),
        ));
    }
    resp.json::<T>()
        .await
        .map_err(|e| PipelineError::source_transient(origin, format!("decode: {e}")))
}
