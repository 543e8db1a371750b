use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-hour energy flow totals (kWh) for the hour starting at `ts_hour_start`.
///
/// For any stored hour:
/// `home ≈ solar_to_home + battery_to_home + (grid_import − grid_to_battery)`
/// where `grid_to_battery = max(0, battery_charged − solar_to_battery)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyStats {
    #[serde(rename = "tsHourStart")]
    pub ts_hour_start: DateTime<Utc>,
    #[serde(rename = "homeKWH")]
    pub home_kwh: f64,
    #[serde(rename = "solarKWH")]
    pub solar_kwh: f64,
    #[serde(rename = "gridImportKWH")]
    pub grid_import_kwh: f64,
    #[serde(rename = "gridExportKWH")]
    pub grid_export_kwh: f64,
    #[serde(rename = "batteryUsedKWH")]
    pub battery_used_kwh: f64,
    #[serde(rename = "batteryChargedKWH")]
    pub battery_charged_kwh: f64,
    #[serde(rename = "solarToHomeKWH")]
    pub solar_to_home_kwh: f64,
    #[serde(rename = "batteryToHomeKWH")]
    pub battery_to_home_kwh: f64,
    #[serde(rename = "solarToBatteryKWH")]
    pub solar_to_battery_kwh: f64,
}

impl EnergyStats {
    pub fn empty(ts_hour_start: DateTime<Utc>) -> Self {
        Self {
            ts_hour_start,
            home_kwh: 0.0,
            solar_kwh: 0.0,
            grid_import_kwh: 0.0,
            grid_export_kwh: 0.0,
            battery_used_kwh: 0.0,
            battery_charged_kwh: 0.0,
            solar_to_home_kwh: 0.0,
            battery_to_home_kwh: 0.0,
            solar_to_battery_kwh: 0.0,
        }
    }

    /// Energy that went from the grid into the battery this hour.
    pub fn grid_to_battery_kwh(&self) -> f64 {
        (self.battery_charged_kwh - self.solar_to_battery_kwh).max(0.0)
    }
}
