use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One hourly real-time energy price in $/kWh.
///
/// Providers with finer native granularity (e.g. 5-minute feeds) average
/// their subintervals into the containing hour before producing one of
/// these. A price is *confirmed* once its interval has fully elapsed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Price {
    #[serde(rename = "tsStart")]
    pub ts_start: Option<DateTime<Utc>>,
    #[serde(rename = "tsEnd")]
    pub ts_end: Option<DateTime<Utc>>,
    #[serde(rename = "dollarsPerKWH")]
    pub dollars_per_kwh: f64,
}

impl Price {
    pub fn new(ts_start: DateTime<Utc>, ts_end: DateTime<Utc>, dollars_per_kwh: f64) -> Self {
        Self {
            ts_start: Some(ts_start),
            ts_end: Some(ts_end),
            dollars_per_kwh,
        }
    }
}

/// Truncate a timestamp down to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp() - ts.timestamp().rem_euclid(3600);
    Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
}

/// Whole hours from `from` until `to`, rounding partial hours up.
pub fn hours_until(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let secs = (to - from).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + 3599) / 3600
}

/// Start of today (midnight UTC); used for cache-control decisions.
pub fn today_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(now.timestamp().rem_euclid(86_400))
}
