// src/error.rs
//! Failure taxonomy shared by adapters, capabilities, cache, and storage.
//!
//! Per-item and per-source failures are absorbed by the pipeline and degrade
//! to a lesser result. Only `StorageUnavailable` ends a run in `Failed`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Adapter has no credentials/config. Skipped at registration.
    #[error("source '{origin}' unavailable: {reason}")]
    SourceUnavailable { origin: String, reason: String },

    /// Timeout, network or parse failure while fetching. Skipped for this run.
    #[error("source '{origin}' failed: {reason}")]
    SourceTransient { origin: String, reason: String },

    /// Capability signalled a rate limit (HTTP 429). Retryable.
    #[error("capability rate limited: {0}")]
    CapabilityRateLimited(String),

    /// Capability answered but the output did not match the contract.
    #[error("capability returned malformed output: {0}")]
    CapabilityMalformed(String),

    /// Capability disabled, unreachable or answered with a non-retryable status.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A single FeedItem could not be written.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Storage cannot be reached at all. Fatal for a run.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A different result was offered for an already cached ContentKey.
    #[error("cache conflict for key {0}")]
    CacheConflict(String),
}

impl PipelineError {
    pub fn source_transient(origin: &str, reason: impl ToString) -> Self {
        Self::SourceTransient {
            origin: origin.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn source_unavailable(origin: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            origin: origin.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Only rate limits are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapabilityRateLimited(_))
    }
}
