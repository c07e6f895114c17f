//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors, calls
//! into the pipeline or the repository, and returns JSON.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use curbside_core::source::ReportSource;
use curbside_core::types::{Category, Coordinates, Label, Report, ReportContent, ReportStatus, Severity};
use curbside_retrieval::filter::{FilterField, FilterOutcome, LocationMatch};
use curbside_retrieval::{PipelineRequest, PipelineResult};
use curbside_storage::ReportStats;
use curbside_vector::{canonical_text, SemanticMatches, SyncOutcome};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SemanticParams {
    pub q: Option<String>,
    pub top_k: Option<usize>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub force_rebuild: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct LocationParams {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub index_size: usize,
    pub total_reports: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSizeResponse {
    pub size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub indexed_count: usize,
    pub embedded: usize,
    pub removed: usize,
    pub rebuilt: bool,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        Self {
            indexed_count: outcome.indexed,
            embedded: outcome.embedded,
            removed: outcome.removed,
            rebuilt: outcome.rebuilt,
        }
    }
}

/// A categorical filter result. Invalid input has `valid: false`, an
/// `error` listing the accepted values and no ids.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterResponse {
    pub valid: bool,
    pub field: FilterField,
    pub value: String,
    pub ids: Vec<Uuid>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FilterOutcome> for FilterResponse {
    fn from(outcome: FilterOutcome) -> Self {
        match outcome {
            FilterOutcome::Matched(m) => Self {
                valid: true,
                field: m.field,
                value: m.value,
                count: m.count,
                ids: m.ids,
                error: None,
            },
            FilterOutcome::Invalid(invalid) => Self {
                valid: false,
                field: invalid.field,
                value: invalid.value,
                ids: Vec::new(),
                count: 0,
                error: Some(invalid.error),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationResponse {
    pub valid: bool,
    pub ids: Vec<Uuid>,
    /// Kilometres from the center per id.
    pub distances: BTreeMap<Uuid, f64>,
    pub count: usize,
    pub radius_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LocationResponse {
    fn from_outcome(outcome: FilterOutcome<LocationMatch>, radius_km: f64) -> Self {
        match outcome {
            FilterOutcome::Matched(m) => Self {
                valid: true,
                count: m.count,
                ids: m.ids,
                distances: m.distances,
                radius_km: m.radius_km,
                error: None,
            },
            FilterOutcome::Invalid(invalid) => Self {
                valid: false,
                ids: Vec::new(),
                distances: BTreeMap::new(),
                count: 0,
                radius_km,
                error: Some(invalid.error),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugReport {
    pub id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// The exact text the index embeds for this report.
    pub canonical_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugListing {
    pub count: usize,
    pub reports: Vec<DebugReport>,
}

/// Request body for POST /reports.
#[derive(Debug, Deserialize)]
pub struct NewReport {
    #[serde(flatten)]
    pub content: ReportContent,
    pub ai_draft: Option<ReportContent>,
    pub status: Option<String>,
    pub location: Option<Coordinates>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedReport {
    pub id: Uuid,
    pub canonical_text: String,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - liveness, index size and store size.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let total_reports = state.repository.count()?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        index_size: state.pipeline.index_size()?,
        total_reports,
    }))
}

/// POST /search - run the retrieval pipeline.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<PipelineRequest>,
) -> Result<Json<PipelineResult>, ApiError> {
    let result = state.pipeline.run(request).await?;
    Ok(Json(result))
}

/// GET /search/semantic - similarity search without planning or filters.
pub async fn search_semantic(
    State(state): State<AppState>,
    Query(params): Query<SemanticParams>,
) -> Result<Json<SemanticMatches>, ApiError> {
    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;

    let matches = state
        .pipeline
        .semantic_search(&q, params.top_k, params.threshold)
        .await?;
    Ok(Json(matches))
}

/// POST /index/sync - bring the index up to date, optionally from scratch.
pub async fn sync_index(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, ApiError> {
    let force_rebuild = params.force_rebuild.unwrap_or(false);
    let outcome = state.pipeline.synchronize(force_rebuild).await?;
    info!(
        indexed = outcome.indexed,
        embedded = outcome.embedded,
        force_rebuild,
        "Index synchronized on request"
    );
    Ok(Json(outcome.into()))
}

/// GET /index/size
pub async fn index_size(
    State(state): State<AppState>,
) -> Result<Json<IndexSizeResponse>, ApiError> {
    Ok(Json(IndexSizeResponse {
        size: state.pipeline.index_size()?,
    }))
}

/// GET /filters/category/{value}
pub async fn filter_category(
    State(state): State<AppState>,
    Path(value): Path<String>,
) -> Result<Json<FilterResponse>, ApiError> {
    filter_field(&state, FilterField::Category, &value)
}

/// GET /filters/severity/{value}
pub async fn filter_severity(
    State(state): State<AppState>,
    Path(value): Path<String>,
) -> Result<Json<FilterResponse>, ApiError> {
    filter_field(&state, FilterField::Severity, &value)
}

/// GET /filters/status/{value}
pub async fn filter_status(
    State(state): State<AppState>,
    Path(value): Path<String>,
) -> Result<Json<FilterResponse>, ApiError> {
    filter_field(&state, FilterField::Status, &value)
}

fn filter_field(
    state: &AppState,
    field: FilterField,
    value: &str,
) -> Result<Json<FilterResponse>, ApiError> {
    let outcome = state.pipeline.filters().by_field(field, value)?;
    Ok(Json(outcome.into()))
}

/// GET /filters/location?lat=&lng=&radius_km= - radius defaults to 1 km.
pub async fn filter_location(
    State(state): State<AppState>,
    Query(params): Query<LocationParams>,
) -> Result<Json<LocationResponse>, ApiError> {
    let radius_km = params.radius_km.unwrap_or(1.0);
    let outcome = state
        .pipeline
        .filters()
        .by_location(params.lat, params.lng, radius_km)?;
    Ok(Json(LocationResponse::from_outcome(outcome, radius_km)))
}

/// GET /stats - report counts by category, severity and status.
pub async fn stats(State(state): State<AppState>) -> Result<Json<ReportStats>, ApiError> {
    Ok(Json(state.repository.stats()?))
}

/// GET /reports/debug - every listed report with its canonical text.
pub async fn debug_reports(State(state): State<AppState>) -> Result<Json<DebugListing>, ApiError> {
    let reports: Vec<DebugReport> = state
        .repository
        .list_reports()?
        .iter()
        .map(|report| DebugReport {
            id: report.id,
            status: report.status.clone(),
            created_at: report.created_at,
            canonical_text: canonical_text(report),
        })
        .collect();

    Ok(Json(DebugListing {
        count: reports.len(),
        reports,
    }))
}

/// POST /reports - store a report. It becomes searchable on the next sync.
///
/// Known category, severity and status spellings are normalized; unknown
/// categories and severities are stored as given.
pub async fn create_report(
    State(state): State<AppState>,
    Json(body): Json<NewReport>,
) -> Result<(StatusCode, Json<CreatedReport>), ApiError> {
    let mut report = Report::new(Uuid::new_v4());
    report.content = normalize_content(body.content);
    report.ai_draft = body.ai_draft.map(normalize_content);
    report.location = body.location;

    if report.field(|c| &c.title).is_none() && report.field(|c| &c.description).is_none() {
        return Err(ApiError::BadRequest(
            "A report needs a title or a description".to_string(),
        ));
    }
    if let Some(raw) = body.status {
        let status = ReportStatus::parse_label(&raw).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Invalid status '{}'. Must be one of: {}",
                raw,
                ReportStatus::vocabulary()
            ))
        })?;
        report.status = status.as_str().to_string();
    }
    if let Some(at) = report.location {
        if !(-90.0..=90.0).contains(&at.lat) || !(-180.0..=180.0).contains(&at.lng) {
            return Err(ApiError::BadRequest(
                "Latitude must be within [-90, 90] and longitude within [-180, 180]".to_string(),
            ));
        }
    }

    state.repository.save(&report)?;
    info!(id = %report.id, "Report stored");

    Ok((
        StatusCode::CREATED,
        Json(CreatedReport {
            id: report.id,
            canonical_text: canonical_text(&report),
        }),
    ))
}

fn normalize_content(mut content: ReportContent) -> ReportContent {
    if let Some(category) = content.category.as_deref().and_then(Category::parse_label) {
        content.category = Some(category.as_str().to_string());
    }
    if let Some(severity) = content.severity.as_deref().and_then(Severity::parse_label) {
        content.severity = Some(severity.as_str().to_string());
    }
    content
}
