use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration, Utc};
use tracing::error;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::price::today_midnight;

pub async fn prices(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let (start, end) = parse_time_range(&params)?;

    let prices = state
        .storage
        .get_price_history(start, end)
        .await
        .map_err(|e| {
            error!("failed to get prices: {}", e);
            AppError::Upstream("failed to get prices".into())
        })?;

    Ok(([(header::CACHE_CONTROL, cache_control(end))], Json(prices)).into_response())
}

pub async fn actions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let (start, end) = parse_time_range(&params)?;

    let actions = state
        .storage
        .get_action_history(start, end)
        .await
        .map_err(|e| {
            error!("failed to get actions: {}", e);
            AppError::Upstream("failed to get actions".into())
        })?;

    Ok(([(header::CACHE_CONTROL, cache_control(end))], Json(actions)).into_response())
}

/// Fully-elapsed days are immutable and cacheable for a day; anything
/// touching today may still change.
pub fn cache_control(end: DateTime<Utc>) -> &'static str {
    if end < today_midnight(Utc::now()) {
        "public, max-age=86400"
    } else {
        "public, max-age=60"
    }
}

/// Parse `start`/`end` query parameters (RFC3339). Defaults to the last 24
/// hours; rejects inverted ranges and ranges longer than 24 hours.
pub fn parse_time_range(
    params: &HashMap<String, String>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (Some(start_str), Some(end_str)) = (params.get("start"), params.get("end")) else {
        let end = Utc::now();
        return Ok((end - Duration::hours(24), end));
    };

    let start = DateTime::parse_from_rfc3339(start_str)
        .map_err(|e| AppError::InvalidInput(format!("invalid start time: {}", e)))?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(end_str)
        .map_err(|e| AppError::InvalidInput(format!("invalid end time: {}", e)))?
        .with_timezone(&Utc);

    if end < start {
        return Err(AppError::InvalidInput(
            "start time must be before end time".into(),
        ));
    }
    if end - start > Duration::hours(24) {
        return Err(AppError::InvalidInput(
            "time range cannot exceed 24 hours".into(),
        ));
    }

    Ok((start, end))
}
