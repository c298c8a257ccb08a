use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;

use super::error::ApiError;
use crate::{
    backfill::CreateJobRequest,
    controller::AppState,
    domain::{MeasurementType, PlaybackStep, TimeAggregation},
    engine::TimeframeRequest,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stations", get(list_stations))
        .route("/data", get(get_data))
        .route("/latest", get(get_latest))
        .route("/refresh", post(refresh_range))
        .route("/snapshot", get(get_snapshot))
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id/result", get(get_job_result))
        .route("/playback", get(get_playback))
        .route("/timeframes", post(get_timeframes))
        .route("/bootstrap", get(bootstrap))
        .route("/tasks/warm-cache", get(warm_cache_status))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Comma-separated measurement types; empty means all.
fn parse_types(raw: Option<&str>) -> Result<Vec<MeasurementType>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            MeasurementType::from_str(&t.to_ascii_lowercase())
                .map_err(|_| ApiError::ValidationError(format!("Unknown measurement type '{t}'.")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct StationQuery {
    pub station: String,
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub aggregation: TimeAggregation,
    pub types: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub aggregation: TimeAggregation,
    pub types: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct PlaybackQuery {
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub step: PlaybackStep,
    pub timezone: Option<String>,
}

pub async fn list_stations(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.engine.station_profiles())
}

pub async fn get_data(State(st): State<AppState>, Query(q): Query<DataQuery>) -> Result<impl IntoResponse, ApiError> {
    let types = parse_types(q.types.as_deref())?;
    let rows = st.engine.get_data(&q.station, q.start, q.end, q.aggregation, &types).await?;
    Ok(Json(rows))
}

pub async fn get_latest(State(st): State<AppState>, Query(q): Query<StationQuery>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(st.engine.get_latest_availability(&q.station).await?))
}

pub async fn refresh_range(
    State(st): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = st.engine.refresh_data_range(&body.station, body.start, body.end).await?;
    Ok(Json(serde_json::json!({ "station": body.station, "rowsStored": rows })))
}

pub async fn get_snapshot(
    State(st): State<AppState>,
    Query(q): Query<SnapshotQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let types = parse_types(q.types.as_deref())?;
    let timezone = q.timezone.unwrap_or_else(|| st.cfg.analytics.local_timezone.clone());
    let snapshot = st
        .engine
        .get_station_snapshot(&q.station, q.start, q.end, q.aggregation, &types, &timezone)
        .await?;
    Ok(Json(snapshot))
}

pub async fn create_job(
    State(st): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = st.engine.create_backfill_job(body).await?;
    Ok((StatusCode::ACCEPTED, Json(created)))
}

pub async fn get_job_status(
    State(st): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(st.engine.get_job_status(&job_id).await?))
}

pub async fn get_job_result(
    State(st): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(st.engine.get_job_result(&job_id).await?))
}

pub async fn get_playback(
    State(st): State<AppState>,
    Query(q): Query<PlaybackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let timezone = q.timezone.unwrap_or_else(|| st.cfg.analytics.local_timezone.clone());
    let frames = st
        .engine
        .get_playback_frames(&q.station, q.start, q.end, q.step, &timezone)
        .await?;
    Ok(Json(frames))
}

pub async fn get_timeframes(
    State(st): State<AppState>,
    Json(body): Json<TimeframeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(st.engine.get_timeframe_analytics(body).await?))
}

pub async fn bootstrap(State(st): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(st.engine.bootstrap().await?))
}

pub async fn warm_cache_status(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.scheduler.warm_cache_status().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        assert_eq!(parse_types(None).unwrap(), vec![]);
        assert_eq!(
            parse_types(Some("speed, Direction")).unwrap(),
            vec![MeasurementType::Speed, MeasurementType::Direction]
        );
        assert!(matches!(parse_types(Some("humidity")), Err(ApiError::ValidationError(_))));
    }
}
