use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;

use crate::models::{Action, BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus};

/// Hours of the day (in the controller's zone) treated as daylight for the
/// solar side of the deficit projection.
const DAYLIGHT_HOURS: std::ops::Range<u32> = 6..19;

/// The deficit projection never looks further ahead than this.
const MAX_PROJECTION_HOURS: i64 = 12;

/// Solar trend ratio clip range.
const TREND_MIN: f64 = 0.25;
const TREND_MAX: f64 = 4.0;

const TREND_EPSILON: f64 = 0.001;

/// The pure decision policy: maps the current price, the forecast window,
/// recent energy history, and the live ESS status to a battery command, a
/// solar-export command, and a human-readable rationale.
///
/// Deterministic given its inputs; tolerates empty forecasts and history.
#[derive(Debug, Clone)]
pub struct Controller {
    tz: Tz,
}

/// Derived quantities computed once per decision.
struct Projection {
    effective_price: f64,
    usable_kwh: f64,
    capacity_kwh: f64,
    /// Net draw over the full projection window.
    projected_need_kwh: f64,
    /// Usable energy goes negative before the next cheaper hour.
    deficit: bool,
    /// Hours until the next future price cheaper than now (capped).
    horizon_hours: i64,
    cheapest_future: Option<(DateTime<Utc>, f64)>,
    most_expensive_future: Option<(DateTime<Utc>, f64)>,
    next_cheaper_hour: Option<DateTime<Utc>>,
}

impl Controller {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn decide(
        &self,
        status: &SystemStatus,
        current_price: &Price,
        future_prices: &[Price],
        history: &[EnergyStats],
        settings: &Settings,
    ) -> Action {
        self.decide_at(Utc::now(), status, current_price, future_prices, history, settings)
    }

    /// Same as [`decide`](Self::decide) with an explicit clock, so tests can
    /// pin the daylight window and history alignment.
    pub fn decide_at(
        &self,
        now: DateTime<Utc>,
        status: &SystemStatus,
        current_price: &Price,
        future_prices: &[Price],
        history: &[EnergyStats],
        settings: &Settings,
    ) -> Action {
        let solar_mode = finalize_solar(desired_solar_mode(current_price, settings, status), status);

        // A capacity of zero means there is no battery to manage; this guard
        // intentionally bypasses the anti-thrash layer.
        if status.battery_capacity_kwh == 0.0 {
            return self.action(now, current_price, BatteryMode::Standby, solar_mode, "Capacity 0; no battery to manage".to_string());
        }

        let p = self.project(now, status, current_price, future_prices, history, settings);

        let (desired, description) = self.pick_battery_mode(current_price, settings, &p);
        let (battery_mode, description) = finalize_battery(desired, description, status);

        self.action(now, current_price, battery_mode, solar_mode, description)
    }

    fn action(
        &self,
        now: DateTime<Utc>,
        current_price: &Price,
        battery_mode: BatteryMode,
        solar_mode: SolarMode,
        description: String,
    ) -> Action {
        Action {
            timestamp: now,
            battery_mode,
            solar_mode,
            description,
            current_price: current_price.clone(),
            dry_run: false,
        }
    }

    /// The ordered rule cascade for the desired battery mode.
    fn pick_battery_mode(
        &self,
        current_price: &Price,
        settings: &Settings,
        p: &Projection,
    ) -> (BatteryMode, String) {
        let raw = current_price.dollars_per_kwh;

        // Free (or negative) energy always charges; a configured price floor
        // charges whenever grid charging is allowed.
        if raw <= 0.0 {
            return (
                BatteryMode::ChargeAny,
                format!("Price ${:.3}/kWh is not positive; charging", raw),
            );
        }
        if settings.grid_charge_batteries
            && p.effective_price < settings.always_charge_under_dollars_per_kwh
        {
            return (
                BatteryMode::ChargeAny,
                format!(
                    "Price ${:.3}/kWh (incl. fees) is under the always-charge threshold ${:.3}/kWh",
                    p.effective_price, settings.always_charge_under_dollars_per_kwh
                ),
            );
        }

        if p.deficit {
            let cheapest = p.cheapest_future.map(|(_, v)| v).unwrap_or(f64::INFINITY);
            if raw <= cheapest {
                // Now is the cheapest window to act in.
                if settings.grid_charge_batteries {
                    return (
                        BatteryMode::ChargeAny,
                        format!(
                            "Projected Deficit within {}h and no cheaper hour ahead; charging now",
                            p.horizon_hours
                        ),
                    );
                }
                return (
                    BatteryMode::Standby,
                    "Deficit predicted; grid charging disabled, holding reserve".to_string(),
                );
            }
            let most_expensive = p.most_expensive_future.map(|(_, v)| v).unwrap_or(f64::NEG_INFINITY);
            if p.effective_price >= most_expensive {
                return (
                    BatteryMode::Load,
                    "Deficit predicted but Current Price is Peak; using battery".to_string(),
                );
            }
            let wait_until = p
                .next_cheaper_hour
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "a cheaper hour".to_string());
            return (
                BatteryMode::Standby,
                format!("Deficit predicted; waiting for cheaper hour at {}", wait_until),
            );
        }

        // No deficit: consider topping off ahead of a price spike.
        if settings.grid_charge_batteries {
            if let Some((spike_at, spike_price)) = p.most_expensive_future {
                let profit = spike_price - p.effective_price;
                let spike_before_dip = p.next_cheaper_hour.map_or(true, |dip| spike_at < dip);
                let headroom =
                    p.usable_kwh < (1.0 - settings.min_battery_soc / 100.0) * p.capacity_kwh;
                if profit >= settings.min_arbitrage_difference_dollars_per_kwh
                    && spike_before_dip
                    && headroom
                {
                    return (
                        BatteryMode::ChargeAny,
                        format!(
                            "Arbitrage: charge now for spike at {} (${:.3}/kWh over current)",
                            spike_at.to_rfc3339(),
                            profit
                        ),
                    );
                }
            }
        }

        if p.usable_kwh >= p.projected_need_kwh {
            return (
                BatteryMode::Load,
                format!(
                    "Sufficient Battery: {:.1} kWh usable covers {:.1} kWh projected",
                    p.usable_kwh, p.projected_need_kwh
                ),
            );
        }

        (
            BatteryMode::Standby,
            "Holding reserve; battery cannot cover projected usage and no charge trigger".to_string(),
        )
    }

    fn project(
        &self,
        now: DateTime<Utc>,
        status: &SystemStatus,
        current_price: &Price,
        future_prices: &[Price],
        history: &[EnergyStats],
        settings: &Settings,
    ) -> Projection {
        let raw = current_price.dollars_per_kwh;
        let effective_price = raw + settings.additional_fees_dollars_per_kwh;

        // Future prices within the next 24 hours.
        let window_end = now + Duration::hours(24);
        let futures: Vec<(DateTime<Utc>, f64)> = future_prices
            .iter()
            .filter_map(|p| p.ts_start.map(|t| (t, p.dollars_per_kwh)))
            .filter(|(t, _)| *t > now && *t <= window_end)
            .collect();

        let cheapest_future = futures
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let most_expensive_future = futures
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        let next_cheaper_hour = futures
            .iter()
            .filter(|(_, v)| *v < raw)
            .map(|(t, _)| *t)
            .min();

        let avg_load_kwh = projected_hourly_load(now, history, settings);
        let (avg_solar_yesterday, trend) = solar_trend(now, history);
        let expected_solar_kwh = avg_solar_yesterday * trend;

        let usable_kwh = ((status.battery_soc - settings.min_battery_soc) / 100.0
            * status.battery_capacity_kwh)
            .max(0.0);

        // The projection runs until the next chance to charge more cheaply
        // than now; with no cheaper hour ahead it runs the full window.
        let horizon_hours = next_cheaper_hour
            .map(|t| crate::models::price::hours_until(now, t).clamp(1, MAX_PROJECTION_HOURS))
            .unwrap_or(MAX_PROJECTION_HOURS);

        let mut deficit = false;
        let mut remaining = usable_kwh;
        let mut projected_need_kwh = 0.0;
        for h in 1..=MAX_PROJECTION_HOURS {
            let hour = (now + Duration::hours(h)).with_timezone(&self.tz).hour();
            let solar = if DAYLIGHT_HOURS.contains(&hour) {
                expected_solar_kwh
            } else {
                0.0
            };
            let draw = (avg_load_kwh - solar).max(0.0);
            projected_need_kwh += draw;
            if h <= horizon_hours {
                remaining -= draw;
                if remaining < 0.0 {
                    deficit = true;
                }
            }
        }

        Projection {
            effective_price,
            usable_kwh,
            capacity_kwh: status.battery_capacity_kwh,
            projected_need_kwh,
            deficit,
            horizon_hours,
            cheapest_future,
            most_expensive_future,
            next_cheaper_hour,
        }
    }
}

/// Mean hourly load over the last 72 hours, zeros discarded and anomalous
/// hours clipped to a multiple of the median.
fn projected_hourly_load(now: DateTime<Utc>, history: &[EnergyStats], settings: &Settings) -> f64 {
    let cutoff = now - Duration::hours(72);
    let mut loads: Vec<f64> = history
        .iter()
        .filter(|h| h.ts_hour_start >= cutoff && h.ts_hour_start <= now)
        .map(|h| h.home_kwh)
        .filter(|v| *v > 0.0)
        .collect();
    if loads.is_empty() {
        return 0.0;
    }
    loads.sort_by(|a, b| a.total_cmp(b));
    let median = if loads.len() % 2 == 1 {
        loads[loads.len() / 2]
    } else {
        (loads[loads.len() / 2 - 1] + loads[loads.len() / 2]) / 2.0
    };
    let cap = if settings.ignore_hour_usage_over_multiple >= 1.0 {
        median * settings.ignore_hour_usage_over_multiple
    } else {
        f64::INFINITY
    };
    let sum: f64 = loads.iter().map(|v| v.min(cap)).sum();
    sum / loads.len() as f64
}

/// Average solar for yesterday (24-48h ago) and the trend ratio of today
/// against it, clipped so one outlier day cannot dominate.
fn solar_trend(now: DateTime<Utc>, history: &[EnergyStats]) -> (f64, f64) {
    let day_ago = now - Duration::hours(24);
    let two_days_ago = now - Duration::hours(48);

    let mean = |from: DateTime<Utc>, to: DateTime<Utc>| -> f64 {
        let values: Vec<f64> = history
            .iter()
            .filter(|h| h.ts_hour_start >= from && h.ts_hour_start < to)
            .map(|h| h.solar_kwh)
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };

    let yesterday = mean(two_days_ago, day_ago);
    let today = mean(day_ago, now);
    let trend = (today / yesterday.max(TREND_EPSILON)).clamp(TREND_MIN, TREND_MAX);
    (yesterday, trend)
}

fn desired_solar_mode(current_price: &Price, settings: &Settings, status: &SystemStatus) -> SolarMode {
    if current_price.dollars_per_kwh <= 0.0 || !settings.grid_export_solar || !status.can_export_solar
    {
        SolarMode::NoExport
    } else {
        SolarMode::Any
    }
}

/// Skip reissuing a solar mode the device is already in.
fn finalize_solar(desired: SolarMode, status: &SystemStatus) -> SolarMode {
    match desired {
        SolarMode::Any if status.can_export_solar => SolarMode::NoChange,
        SolarMode::NoExport if !status.can_export_solar => SolarMode::NoChange,
        other => other,
    }
}

/// Reconcile the desired battery mode against observed battery activity so
/// we never issue redundant or contradictory commands.
fn finalize_battery(
    desired: BatteryMode,
    description: String,
    status: &SystemStatus,
) -> (BatteryMode, String) {
    let charging_kw = (-status.battery_kw).max(0.0);
    let solar_surplus = (status.solar_kw - status.home_kw).max(0.0);
    let charging_from_grid = charging_kw > solar_surplus && status.grid_kw > 0.0;

    match desired {
        BatteryMode::ChargeAny if status.battery_kw < 0.0 => {
            (BatteryMode::NoChange, format!("{} (already charging)", description))
        }
        BatteryMode::Load if status.battery_kw > 0.0 => {
            (BatteryMode::NoChange, format!("{} (already discharging)", description))
        }
        BatteryMode::Standby if status.battery_kw > 0.0 => {
            (BatteryMode::NoChange, format!("{} (letting discharge finish)", description))
        }
        BatteryMode::Standby if charging_from_grid => {
            // Don't just withhold the command; actively stop grid charging.
            (BatteryMode::Load, format!("{}; stopping grid charging", description))
        }
        BatteryMode::Standby => (BatteryMode::NoChange, format!("{} (battery idle)", description)),
        other => (other, description),
    }
}
