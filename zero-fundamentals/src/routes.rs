//! HTTP routes for the fundamentals service.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::FundamentalsError;
use crate::pillars::{EightPillarsAnalysis, SymbolScorer};
use crate::scanner::{
    Page, PillarScanRow, ScanJob, ScanOptions, ScanResultsQuery, SortField, SortOrder,
};
use crate::valuation::{SavedValuation, ValuationRequest, ValuationResult};
use crate::FundamentalsState;

/// Header carrying the caller's user id. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<T, FundamentalsError>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    pub job: Option<ScanJob>,
    pub progress_pct: f64,
}

impl IntoResponse for FundamentalsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PillarsParams {
    #[serde(default)]
    pub force_refresh: bool,
}

/// Query string form of [`ScanResultsQuery`]; `pillars` is comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct ScanResultsParams {
    pub scan_id: Option<i64>,
    pub pillars: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl TryFrom<ScanResultsParams> for ScanResultsQuery {
    type Error = FundamentalsError;

    fn try_from(p: ScanResultsParams) -> Result<Self, Self::Error> {
        let sort = match p.sort.as_deref() {
            None | Some("") => SortField::default(),
            Some(s) => SortField::parse(s)
                .ok_or_else(|| {
                    FundamentalsError::InvalidInput(format!("unknown sort field: {}", s))
                })?,
        };
        let order = match p.order.as_deref() {
            None | Some("") => SortOrder::default(),
            Some(o) => SortOrder::parse(o)
                .ok_or_else(|| {
                    FundamentalsError::InvalidInput(format!("unknown sort order: {}", o))
                })?,
        };

        Ok(ScanResultsQuery {
            scan_id: p.scan_id,
            pillars: p
                .pillars
                .as_deref()
                .map(ScanResultsQuery::parse_pillars)
                .unwrap_or_default(),
            page: p.page,
            per_page: p.per_page,
            sort,
            order,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveValuationRequest {
    #[serde(default)]
    pub name: String,
    pub result: ValuationResult,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListValuationsParams {
    pub symbol: Option<String>,
}

fn user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            FundamentalsError::InvalidInput(format!("missing {} header", USER_ID_HEADER))
        })
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "zero-fundamentals".to_string(),
    })
}

pub async fn get_pillars(
    State(state): State<Arc<FundamentalsState>>,
    Path(symbol): Path<String>,
    Query(params): Query<PillarsParams>,
) -> ApiResult<Json<EightPillarsAnalysis>> {
    let analysis = state.pillars.score_symbol(&symbol, params.force_refresh).await?;
    Ok(Json(analysis))
}

pub async fn start_scan(
    State(state): State<Arc<FundamentalsState>>,
    options: Option<Json<ScanOptions>>,
) -> ApiResult<(StatusCode, Json<ScanJob>)> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    let job = state.scanner.run_scan(options).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn scan_status(
    State(state): State<Arc<FundamentalsState>>,
) -> ApiResult<Json<ScanStatusResponse>> {
    let job = state.scanner.get_scan_status().await?;
    let progress_pct = job.as_ref().map(ScanJob::progress_pct).unwrap_or(0.0);
    Ok(Json(ScanStatusResponse { job, progress_pct }))
}

pub async fn scan_results(
    State(state): State<Arc<FundamentalsState>>,
    Query(params): Query<ScanResultsParams>,
) -> ApiResult<Json<Page<PillarScanRow>>> {
    let query = ScanResultsQuery::try_from(params)?;
    Ok(Json(state.scanner.get_scan_results(&query).await?))
}

pub async fn calculate_valuation(
    State(state): State<Arc<FundamentalsState>>,
    Path(symbol): Path<String>,
    request: Option<Json<ValuationRequest>>,
) -> ApiResult<Json<ValuationResult>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.valuation.calculate_valuation(&symbol, request).await?))
}

pub async fn save_valuation(
    State(state): State<Arc<FundamentalsState>>,
    headers: HeaderMap,
    Json(body): Json<SaveValuationRequest>,
) -> ApiResult<(StatusCode, Json<SavedValuation>)> {
    let user = user_id(&headers)?;
    let saved = state.valuation.save_valuation(&user, &body.name, body.result).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn list_valuations(
    State(state): State<Arc<FundamentalsState>>,
    headers: HeaderMap,
    Query(params): Query<ListValuationsParams>,
) -> ApiResult<Json<Vec<SavedValuation>>> {
    let user = user_id(&headers)?;
    Ok(Json(
        state
            .valuation
            .list_valuations(&user, params.symbol.as_deref())
            .await?,
    ))
}

pub async fn get_valuation(
    State(state): State<Arc<FundamentalsState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<SavedValuation>> {
    let user = user_id(&headers)?;
    Ok(Json(state.valuation.get_valuation(&user, &id).await?))
}

pub async fn delete_valuation(
    State(state): State<Arc<FundamentalsState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let user = user_id(&headers)?;
    state.valuation.delete_valuation(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
