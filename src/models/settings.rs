use serde::{Deserialize, Serialize};

/// User policy knobs, stored in the database and mutable at runtime via the
/// settings API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
    /// Pause updates entirely (sync steps still run).
    #[serde(rename = "pause")]
    pub pause: bool,

    /// Always charge when the effective price is under this amount ($/kWh).
    #[serde(rename = "alwaysChargeUnderDollarsPerKWH")]
    pub always_charge_under_dollars_per_kwh: f64,
    /// Delivery fees added to any imported-energy price ($/kWh).
    #[serde(rename = "additionalFeesDollarsPerKWH")]
    pub additional_fees_dollars_per_kwh: f64,
    /// Minimum profit per kWh to justify grid-charging for later discharge.
    #[serde(rename = "minArbitrageDifferenceDollarsPerKWH")]
    pub min_arbitrage_difference_dollars_per_kwh: f64,

    /// The minimum battery SOC to hold in reserve at all times.
    #[serde(rename = "minBatterySOC")]
    pub min_battery_soc: f64,

    /// Allow charging the batteries from the grid.
    #[serde(rename = "gridChargeBatteries")]
    pub grid_charge_batteries: bool,
    /// Allow exporting solar to the grid.
    #[serde(rename = "gridExportSolar")]
    pub grid_export_solar: bool,

    /// Cap on per-hour load used by the deficit projection, as a multiple of
    /// the median hour, so a single anomalous hour cannot dominate.
    #[serde(rename = "ignoreHourUsageOverMultiple")]
    pub ignore_hour_usage_over_multiple: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dry_run: false,
            pause: false,
            always_charge_under_dollars_per_kwh: 0.0,
            additional_fees_dollars_per_kwh: 0.0,
            min_arbitrage_difference_dollars_per_kwh: 0.0,
            min_battery_soc: 0.0,
            grid_charge_batteries: false,
            grid_export_solar: false,
            ignore_hour_usage_over_multiple: 4.0,
        }
    }
}

impl Settings {
    /// Validate the value ranges; rejected settings never reach storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.always_charge_under_dollars_per_kwh < 0.0
            || self.additional_fees_dollars_per_kwh < 0.0
            || self.min_arbitrage_difference_dollars_per_kwh < 0.0
        {
            return Err("price settings must be non-negative".into());
        }
        if !(0.0..=100.0).contains(&self.min_battery_soc) {
            return Err("minBatterySOC must be between 0 and 100".into());
        }
        if self.ignore_hour_usage_over_multiple < 1.0 {
            return Err("ignoreHourUsageOverMultiple must be at least 1".into());
        }
        Ok(())
    }
}
