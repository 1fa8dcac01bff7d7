// src/api.rs
//! HTTP surface under `/api`. Handlers validate input, delegate to the
//! service graph and map `PipelineError` onto status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::aggregate::{
    Distribution, ProductTrend, SummaryReport, TimeRange, TrendPoint, WordCount,
    DEFAULT_FEED_LIMIT, DEFAULT_SAMPLE_SIZE,
};
use crate::analyze::AnalysisMode;
use crate::error::PipelineError;
use crate::pipeline::{RunId, RunRecord};
use crate::services::AppServices;
use crate::store::retention::purge_and_invalidate;
use crate::store::FeedItem;

const RECENT_RUNS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<AppServices>,
}

impl AppState {
    pub fn new(services: Arc<AppServices>) -> Self {
        Self { services }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", get(info))
        .route("/api/start_analysis", post(start_analysis))
        .route("/api/compare_competitors", post(compare_competitors))
        .route("/api/distribution/{query}", get(distribution))
        .route("/api/trends/{query}", get(trends))
        .route("/api/wordcloud/{query}", get(wordcloud))
        .route("/api/summary/{query}", get(summary))
        .route("/api/feed/{query}", get(feed))
        .route("/api/delete_data/{query}", post(delete_data))
        .route("/api/runs/{run_id}", get(run_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(PipelineError::StorageUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(target: "aggregate", error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn bad(msg: impl Into<String>) -> ApiError {
    ApiError::BadRequest(msg.into())
}

fn parse_mode(raw: Option<&str>) -> Result<AnalysisMode, ApiError> {
    raw.map_or(Ok(AnalysisMode::default()), |m| m.parse().map_err(bad))
}

fn parse_range(raw: Option<&str>) -> Result<TimeRange, ApiError> {
    raw.map_or(Ok(TimeRange::default()), |r| r.parse().map_err(bad))
}

fn in_range(name: &str, v: usize, lo: usize, hi: usize) -> Result<usize, ApiError> {
    if (lo..=hi).contains(&v) {
        Ok(v)
    } else {
        Err(bad(format!("{name} must be between {lo} and {hi}")))
    }
}

fn non_empty(query: &str) -> Result<&str, ApiError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(bad("query must not be empty"));
    }
    Ok(q)
}

// ------------------------------------------------------------
// Request / response shapes
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ModeParams {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    time_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    time_range: Option<String>,
    sample_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FeedParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StartReq {
    query: String,
}

#[derive(Debug, Serialize)]
struct StartResp {
    status: &'static str,
    query: String,
    mode: AnalysisMode,
    run_id: RunId,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CompareReq {
    products: Vec<String>,
    #[serde(default)]
    time_range: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompareResp {
    time_range: TimeRange,
    run_ids: Vec<RunId>,
    comparison: Vec<ProductTrend>,
}

#[derive(Debug, Serialize)]
struct DeleteResp {
    status: &'static str,
    message: String,
    deleted: usize,
    invalidated_keys: usize,
}

#[derive(Debug, Serialize)]
struct InfoResp {
    sources: Vec<&'static str>,
    extractor: &'static str,
    store: &'static str,
    modes: [&'static str; 3],
    short_text_max_chars: usize,
    sample_every: usize,
    max_concurrent_extractions: usize,
    aspect_keywords: Vec<String>,
    cached_results: usize,
    runs_tracked: usize,
    recent_runs: Vec<RunBrief>,
}

#[derive(Debug, Serialize)]
struct RunBrief {
    run_id: RunId,
    query: String,
    state: &'static str,
}

// ------------------------------------------------------------
// Handlers
// ------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Response {
    let store = state.services.store.kind();
    match state.services.store.ping().await {
        Ok(()) => Json(json!({ "status": "ok", "store": store })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "store": store, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn info(State(state): State<AppState>) -> Json<InfoResp> {
    let s = &state.services;
    Json(InfoResp {
        sources: s.sources.clone(),
        extractor: s.extractor,
        store: s.store.kind(),
        modes: [
            AnalysisMode::Hybrid.as_str(),
            AnalysisMode::Transformers.as_str(),
            AnalysisMode::Llm.as_str(),
        ],
        short_text_max_chars: s.config.short_text_max_chars,
        sample_every: s.config.sample_every,
        max_concurrent_extractions: s.config.max_concurrent_extractions,
        aspect_keywords: s.config.aspect_keywords.clone(),
        cached_results: s.cache.len(),
        runs_tracked: s.runs.len(),
        recent_runs: s
            .runs
            .snapshot_last_n(RECENT_RUNS)
            .into_iter()
            .rev()
            .map(|r| RunBrief {
                run_id: r.run_id,
                query: r.query,
                state: r.state.label(),
            })
            .collect(),
    })
}

async fn start_analysis(
    State(state): State<AppState>,
    Query(p): Query<ModeParams>,
    Json(body): Json<StartReq>,
) -> ApiResult<StartResp> {
    let query = non_empty(&body.query)?.to_string();
    let mode = parse_mode(p.mode.as_deref())?;
    let run_id = state.services.pipeline.start(&query, mode);
    Ok(Json(StartResp {
        status: "started",
        message: format!("Analysis for '{query}' started in {} mode.", mode.as_str()),
        query,
        mode,
        run_id,
    }))
}

async fn compare_competitors(
    State(state): State<AppState>,
    Query(p): Query<ModeParams>,
    Json(body): Json<CompareReq>,
) -> ApiResult<CompareResp> {
    let mode = parse_mode(p.mode.as_deref())?;
    let range = parse_range(body.time_range.as_deref())?;
    in_range("products", body.products.len(), 2, 10)?;
    let products = body
        .products
        .iter()
        .map(|q| non_empty(q).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;

    let run_ids = products
        .iter()
        .map(|q| state.services.pipeline.start(q, mode))
        .collect();
    let comparison = state.services.aggregation.comparison(&products, range).await?;
    Ok(Json(CompareResp {
        time_range: range,
        run_ids,
        comparison,
    }))
}

async fn distribution(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<RangeParams>,
) -> ApiResult<Distribution> {
    let range = parse_range(p.time_range.as_deref())?;
    let q = non_empty(&query)?;
    Ok(Json(state.services.aggregation.distribution(q, range).await?))
}

async fn trends(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<RangeParams>,
) -> ApiResult<Vec<TrendPoint>> {
    let range = parse_range(p.time_range.as_deref())?;
    let q = non_empty(&query)?;
    Ok(Json(state.services.aggregation.trends(q, range).await?))
}

async fn wordcloud(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<RangeParams>,
) -> ApiResult<Vec<WordCount>> {
    let range = parse_range(p.time_range.as_deref())?;
    let q = non_empty(&query)?;
    Ok(Json(state.services.aggregation.word_cloud(q, range).await?))
}

async fn summary(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<SummaryParams>,
) -> ApiResult<SummaryReport> {
    let range = parse_range(p.time_range.as_deref())?;
    let n = in_range("sample_size", p.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE), 5, 100)?;
    let q = non_empty(&query)?;
    state
        .services
        .aggregation
        .summary(q, range, n)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No documents available for summary.".into()))
}

async fn feed(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<FeedParams>,
) -> ApiResult<Vec<FeedItem>> {
    let limit = in_range("limit", p.limit.unwrap_or(DEFAULT_FEED_LIMIT), 1, 500)?;
    let q = non_empty(&query)?;
    Ok(Json(state.services.aggregation.feed(q, limit).await?))
}

async fn delete_data(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(p): Query<DeleteParams>,
) -> ApiResult<DeleteResp> {
    let days = p.days.unwrap_or(state.services.config.retention_days);
    in_range("days", days as usize, 1, 365)?;
    let q = non_empty(&query)?;
    let s = &state.services;
    let purge = purge_and_invalidate(&s.store, &s.cache, Some(q), days).await?;
    Ok(Json(DeleteResp {
        status: "success",
        message: format!("Records for '{q}' older than {days} days have been deleted."),
        deleted: purge.deleted,
        invalidated_keys: purge.orphaned_keys.len(),
    }))
}

async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<RunRecord> {
    let id: RunId = run_id
        .parse()
        .map_err(|_| bad(format!("invalid run id '{run_id}'")))?;
    state
        .services
        .runs
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {id} not found")))
}
