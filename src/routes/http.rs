// Handlers for the query API. Text reports come back as {"text": ...}.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::models::Tier;
use crate::store::now_local;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Handler failure rendered as `{"error": "..."}`.
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::warn!(error = %e, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{e:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn text(body: String) -> Json<serde_json::Value> {
    Json(json!({ "text": body }))
}

#[derive(Debug, Deserialize)]
pub(super) struct PrefixQuery {
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct HoursQuery {
    hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MinutesQuery {
    minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DateQuery {
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WhitelistBody {
    /// Comma separated station names.
    stations: String,
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /api/status: runs a status diff now. 204 when the provider is unavailable
/// or no station matches the prefix.
pub(super) async fn status_handler(
    State(state): State<AppState>,
    Query(q): Query<PrefixQuery>,
) -> ApiResult<Response> {
    match state.monitor.status_now(q.prefix.as_deref()).await? {
        Some(outcome) => Ok(Json(outcome).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// GET /api/fixed-rate: latest 15-min rollup within the trailing `hours` (default 1).
pub(super) async fn fixed_rate_handler(
    State(state): State<AppState>,
    Query(q): Query<HoursQuery>,
) -> ApiResult<impl IntoResponse> {
    let hours = q.hours.unwrap_or(1);
    if hours == 0 {
        return Err(ApiError::bad_request("hours must be > 0"));
    }
    Ok(text(state.monitor.fixed_rate_summary(hours).await?))
}

/// GET /api/fixed-rate/{name}: station or province average over `minutes`.
pub(super) async fn window_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<MinutesQuery>,
) -> ApiResult<impl IntoResponse> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("station or province name is required"));
    }
    if q.minutes == Some(0) {
        return Err(ApiError::bad_request("minutes must be > 0"));
    }
    Ok(text(state.monitor.window_report(&name, q.minutes).await?))
}

/// GET /api/rollups/{tier}: rows of one tier for the trailing `hours` (default 24).
pub(super) async fn rollups_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    Query(q): Query<HoursQuery>,
) -> ApiResult<impl IntoResponse> {
    let tier: Tier = tier
        .parse()
        .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;
    let hours = q.hours.unwrap_or(24);
    let rows = state.monitor.rollups(tier, hours).await?;
    Ok(Json(json!({
        "tier": tier,
        "hours": hours,
        "count": rows.len(),
        "rows": rows,
    })))
}

/// GET /api/report/hourly: hourly table for `date` (default today).
pub(super) async fn hourly_report_handler(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> ApiResult<impl IntoResponse> {
    let day = q.date.unwrap_or_else(|| now_local().date());
    Ok(text(state.monitor.hourly_table(day).await?))
}

/// GET /api/whitelist
pub(super) async fn whitelist_handler(State(state): State<AppState>) -> impl IntoResponse {
    let names = state.monitor.whitelist();
    Json(json!({
        "text": crate::report::render_whitelist(&names),
        "names": names,
    }))
}

/// POST /api/whitelist: `{"stations": "TNN1,YBI2"}`.
pub(super) async fn add_whitelist_handler(
    State(state): State<AppState>,
    Json(body): Json<WhitelistBody>,
) -> ApiResult<impl IntoResponse> {
    if body.stations.trim().is_empty() {
        return Err(ApiError::bad_request("stations must list at least one name"));
    }
    Ok(Json(state.monitor.add_to_whitelist(&body.stations)))
}

/// POST /api/cleanup: long-horizon retention pass plus VACUUM.
pub(super) async fn cleanup_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.cleanup().await?))
}

/// GET /api/stats: row counts per table and file size.
pub(super) async fn stats_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.stats().await?))
}
