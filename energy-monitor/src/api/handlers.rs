use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use energy_client::{Reading, Summary};
use serde::Serialize;

use super::{AppState, RangeParams};
use crate::{device::DeviceStatus, error::AppError};

pub const DOWNLOAD_FILENAME: &str = "energy_readings.csv";

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub ts: String,
    pub power: f64,
    pub current: f64,
    pub voltage: f64,
    pub kwh: f64,
}

impl From<Reading> for HistoryEntry {
    fn from(r: Reading) -> Self {
        Self {
            ts: r.ts_key(),
            power: r.power,
            current: r.current,
            voltage: r.voltage,
            kwh: r.kwh,
        }
    }
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn status(State(state): State<AppState>) -> Result<Json<DeviceStatus>, AppError> {
    let status = state.device.get_status().await?;
    Ok(Json(status))
}

pub async fn summary(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Summary>, AppError> {
    metrics::counter!("http_summary_requests_total").increment(1);
    let range = params.resolve()?;
    let summary = state.aggregator.summary(range).await?;
    Ok(Json(summary))
}

pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let range = params.resolve()?;
    let rows = state.aggregator.history(range).await?;
    Ok(Json(rows.into_iter().map(HistoryEntry::from).collect()))
}

pub async fn download(State(state): State<AppState>) -> Result<Response, AppError> {
    let stream = state.mirror.export().await?;
    let disposition = format!("attachment; filename=\"{DOWNLOAD_FILENAME}\"");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

pub async fn power_on(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.device.turn_on().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn power_off(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.device.turn_off().await?;
    Ok(StatusCode::NO_CONTENT)
}
