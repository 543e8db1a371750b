use serde::{Deserialize, Serialize};

/// Instantaneous snapshot of the ESS.
///
/// `battery_kw` is signed: positive while discharging, negative while
/// charging. `grid_kw` is signed: positive while importing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(rename = "batterySOC")]
    pub battery_soc: f64,
    #[serde(rename = "batteryCapacityKWH")]
    pub battery_capacity_kwh: f64,
    #[serde(rename = "maxBatteryChargeKW")]
    pub max_battery_charge_kw: f64,
    #[serde(rename = "batteryKW")]
    pub battery_kw: f64,
    #[serde(rename = "solarKW")]
    pub solar_kw: f64,
    #[serde(rename = "homeKW")]
    pub home_kw: f64,
    #[serde(rename = "gridKW")]
    pub grid_kw: f64,
    #[serde(rename = "emergencyMode")]
    pub emergency_mode: bool,
    #[serde(rename = "canImportBattery")]
    pub can_import_battery: bool,
    #[serde(rename = "canExportBattery")]
    pub can_export_battery: bool,
    #[serde(rename = "canExportSolar")]
    pub can_export_solar: bool,
}

/// Native power-control knobs pushed to the ESS.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerControlConfig {
    #[serde(rename = "gridChargeEnabled")]
    pub grid_charge_enabled: bool,
    #[serde(rename = "gridExportEnabled")]
    pub grid_export_enabled: bool,
    #[serde(rename = "gridExportMax")]
    pub grid_export_max: f64,
}
