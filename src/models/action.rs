use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Price;

/// Battery command issued to the ESS.
///
/// `NoChange` is an explicit "do not reissue" sentinel used by the
/// anti-thrash layer; it is not equivalent to `Standby` or `Load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatteryMode {
    NoChange,
    Standby,
    ChargeAny,
    ChargeSolar,
    Load,
}

/// Solar export command issued to the ESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SolarMode {
    NoChange,
    NoExport,
    Any,
}

impl fmt::Display for BatteryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoChange => "noChange",
            Self::Standby => "standby",
            Self::ChargeAny => "chargeAny",
            Self::ChargeSolar => "chargeSolar",
            Self::Load => "load",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BatteryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noChange" => Ok(Self::NoChange),
            "standby" => Ok(Self::Standby),
            "chargeAny" => Ok(Self::ChargeAny),
            "chargeSolar" => Ok(Self::ChargeSolar),
            "load" => Ok(Self::Load),
            other => Err(format!("unknown battery mode: {}", other)),
        }
    }
}

impl fmt::Display for SolarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoChange => "noChange",
            Self::NoExport => "noExport",
            Self::Any => "any",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SolarMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noChange" => Ok(Self::NoChange),
            "noExport" => Ok(Self::NoExport),
            "any" => Ok(Self::Any),
            other => Err(format!("unknown solar mode: {}", other)),
        }
    }
}

/// Record of one decision taken by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "batteryMode")]
    pub battery_mode: BatteryMode,
    #[serde(rename = "solarMode")]
    pub solar_mode: SolarMode,
    #[serde(rename = "description")]
    pub description: String,
    #[serde(rename = "currentPrice")]
    pub current_price: Price,
    #[serde(rename = "dryRun")]
    pub dry_run: bool,
}
