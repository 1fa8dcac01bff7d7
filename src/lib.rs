// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod aggregate;
pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod services;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::analyze::ai_adapter;
pub use crate::api::{router, AppState};
pub use crate::error::PipelineError;
pub use crate::pipeline::{Pipeline, RunId, RunRecord, RunState};
pub use crate::services::AppServices;
