use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::handlers::history::{cache_control, parse_time_range};
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::price::truncate_to_hour;
use crate::models::{EnergyStats, Price};

/// Savings roll-up over a window: what the hours cost, what they credited,
/// and what the battery and solar displaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsStats {
    #[serde(rename = "timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "cost")]
    pub cost: f64,
    #[serde(rename = "credit")]
    pub credit: f64,
    /// Avoided minus charging: the battery's net effect.
    #[serde(rename = "batterySavings")]
    pub battery_savings: f64,
    /// Solar powering the home, valued at the hourly price.
    #[serde(rename = "solarSavings")]
    pub solar_savings: f64,
    /// What the grid would have charged for the energy the battery served.
    #[serde(rename = "avoidedCost")]
    pub avoided_cost: f64,
    /// What charging the battery from the grid cost.
    #[serde(rename = "chargingCost")]
    pub charging_cost: f64,
    #[serde(rename = "solarGenerated")]
    pub solar_generated: f64,
    #[serde(rename = "gridImported")]
    pub grid_imported: f64,
    #[serde(rename = "gridExported")]
    pub grid_exported: f64,
    #[serde(rename = "homeUsed")]
    pub home_used: f64,
    #[serde(rename = "batteryUsed")]
    pub battery_used: f64,
}

pub async fn savings(
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
    let energy = state
        .storage
        .get_energy_history(start, end)
        .await
        .map_err(|e| {
            error!("failed to get energy history: {}", e);
            AppError::Upstream("failed to get energy history".into())
        })?;

    let totals = compute_savings(start, &prices, &energy);
    Ok(([(header::CACHE_CONTROL, cache_control(end))], Json(totals)).into_response())
}

/// Roll `EnergyStats × hourly price` into window totals. Hours with no
/// price data still contribute their energy amounts at a price of zero.
pub fn compute_savings(
    start: DateTime<Utc>,
    prices: &[Price],
    energy: &[EnergyStats],
) -> SavingsStats {
    // Average any sub-hour price rows into their hour.
    let mut hourly_sum: HashMap<DateTime<Utc>, (f64, usize)> = HashMap::new();
    for price in prices {
        let Some(ts) = price.ts_start else { continue };
        let entry = hourly_sum.entry(truncate_to_hour(ts)).or_insert((0.0, 0));
        entry.0 += price.dollars_per_kwh;
        entry.1 += 1;
    }
    let hourly: HashMap<DateTime<Utc>, f64> = hourly_sum
        .into_iter()
        .map(|(ts, (sum, count))| (ts, sum / count as f64))
        .collect();

    let mut totals = SavingsStats {
        timestamp: Some(start),
        ..SavingsStats::default()
    };

    for stat in energy {
        let hour = truncate_to_hour(stat.ts_hour_start);
        let price = hourly.get(&hour).copied().unwrap_or(0.0);

        totals.home_used += stat.home_kwh;
        totals.solar_generated += stat.solar_kwh;
        totals.grid_imported += stat.grid_import_kwh;
        totals.grid_exported += stat.grid_export_kwh;
        totals.battery_used += stat.battery_used_kwh;

        totals.cost += stat.grid_import_kwh * price;
        totals.credit += stat.grid_export_kwh * price;

        totals.avoided_cost += stat.battery_to_home_kwh * price;
        totals.charging_cost += stat.grid_to_battery_kwh() * price;
        totals.solar_savings += stat.solar_to_home_kwh * price;
    }

    totals.battery_savings = totals.avoided_cost - totals.charging_cost;
    totals
}
