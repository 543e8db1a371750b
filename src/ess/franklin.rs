use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::price::truncate_to_hour;
use crate::models::{
    BatteryMode, EnergyStats, PowerControlConfig, Settings, SolarMode, SystemStatus,
};

use super::EssSystem;

/// TOU work mode for self-consumption; all battery commands run in this
/// mode and steer behavior through the reserve SOC.
const WORK_MODE_SELF_CONSUMPTION: i64 = 2;

/// Power-control flag values: 0 disables, 2 enables.
const FLAG_DISABLED: i64 = 0;
const FLAG_ENABLED: i64 = 2;

const TOKEN_LIFETIME_HOURS: i64 = 12;

/// FranklinWH cloud adapter.
///
/// The vendor API is a session-token HTTP API; the adapter logs in lazily,
/// refreshes the token when it expires, and discovers the gateway id from
/// the account when none is configured.
pub struct Franklin {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: Mutex<Session>,
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    gateway_id: String,
    /// Cached from the last `apply_settings`; consumed when commanding.
    reserve_soc: f64,
    grid_charge: bool,
    #[allow(dead_code)]
    grid_export: bool,
}

#[derive(Debug, Deserialize)]
struct VendorResponse<T> {
    code: i64,
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<T>,
}

impl<T> VendorResponse<T> {
    fn check(&self, context: &str) -> Result<()> {
        if !self.success || self.code != 200 {
            return Err(AppError::Upstream(format!(
                "{}: vendor error code {} ({})",
                context,
                self.code,
                self.message.clone().unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn into_result(self, context: &str) -> Result<T> {
        self.check(context)?;
        self.result
            .ok_or_else(|| AppError::Upstream(format!("{}: vendor returned no result", context)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginResult {
    token: String,
}

#[derive(Debug, Deserialize)]
struct GatewayEntry {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceInfo {
    #[serde(rename = "totalCap", default)]
    total_cap: f64,
    #[serde(rename = "zoneInfo", default)]
    zone_info: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PowerControlSetting {
    #[serde(rename = "gridMaxFlag", default)]
    grid_max_flag: i64,
    #[serde(rename = "gridFeedMaxFlag", default)]
    grid_feed_max_flag: i64,
    #[serde(rename = "globalGridChargeMax", default)]
    global_grid_charge_max: f64,
    #[serde(rename = "gridFeedMax", default)]
    grid_feed_max: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CompositeInfo {
    #[serde(rename = "runtimeData", default)]
    runtime_data: RuntimeData,
    #[serde(rename = "emergencyMode", default)]
    emergency_mode: bool,
}

/// Instantaneous power readings, in watts. `p_fhp` is the battery: positive
/// while discharging. `p_uti` is the grid: positive while importing.
#[derive(Debug, Default, Deserialize)]
struct RuntimeData {
    #[serde(default)]
    soc: f64,
    #[serde(default)]
    p_fhp: f64,
    #[serde(default)]
    p_sun: f64,
    #[serde(default)]
    p_load: f64,
    #[serde(default)]
    p_uti: f64,
}

#[derive(Debug, Default, Deserialize)]
struct TouList {
    #[serde(default)]
    list: Vec<TouMode>,
    #[serde(rename = "currendId", default)]
    currend_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TouMode {
    id: i64,
    #[serde(rename = "workMode", default)]
    work_mode: i64,
    #[serde(default)]
    soc: Option<f64>,
}

/// Per-day power arrays; sample `i` holds until sample `i + 1`. The vendor
/// spells grid "gird" in several field names.
#[derive(Debug, Default, Deserialize)]
struct PowerByDay {
    #[serde(rename = "deviceTimeArray", default)]
    device_time_array: Vec<String>,
    #[serde(rename = "powerSolarHomeArray", default)]
    power_solar_home_array: Vec<f64>,
    #[serde(rename = "powerFhpHomeArray", default)]
    power_fhp_home_array: Vec<f64>,
    #[serde(rename = "powerSolarGirdArray", default)]
    power_solar_gird_array: Vec<f64>,
    #[serde(rename = "powerSolarFhpArray", default)]
    power_solar_fhp_array: Vec<f64>,
    #[serde(rename = "powerGirdFhpArray", default)]
    power_gird_fhp_array: Vec<f64>,
    #[serde(rename = "powerGirdHomeArray", default)]
    power_gird_home_array: Vec<f64>,
    #[serde(rename = "powerFhpGirdArray", default)]
    power_fhp_gird_array: Vec<f64>,
}

/// Hourly kWh accumulator for one bucket.
#[derive(Debug, Default, Clone, Copy)]
struct HourFlows {
    solar_to_home: f64,
    battery_to_home: f64,
    solar_to_grid: f64,
    solar_to_battery: f64,
    grid_to_battery: f64,
    grid_to_home: f64,
    battery_to_grid: f64,
}

impl Franklin {
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        gateway_id: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ess-autopilot")
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::upstream("building ess client", e))?;
        Ok(Self {
            client,
            base_url,
            username,
            password,
            session: Mutex::new(Session {
                gateway_id,
                ..Session::default()
            }),
        })
    }

    #[cfg(test)]
    fn with_token(self, token: &str) -> Self {
        {
            let mut session = self.session.try_lock().unwrap();
            session.token = Some(token.to_string());
            session.token_expiry = Some(Utc::now() + Duration::hours(1));
        }
        self
    }

    async fn login(&self, session: &mut Session) -> Result<()> {
        debug!("logging in to franklin cloud");
        let password_hash = format!("{:x}", md5::compute(self.password.as_bytes()));
        let response: VendorResponse<LoginResult> = self
            .client
            .post(format!(
                "{}/hes-gateway/terminal/initialize/appUserOrInstallerLogin",
                self.base_url
            ))
            .form(&[
                ("account", self.username.as_str()),
                ("password", password_hash.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::upstream("franklin login", e))?
            .json()
            .await
            .map_err(|e| AppError::upstream("decoding franklin login", e))?;

        let result = response.into_result("franklin login")?;
        session.token = Some(result.token);
        session.token_expiry = Some(Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS));

        if session.gateway_id.is_empty() {
            let gateways: Vec<GatewayEntry> = self
                .get_with_token(
                    session,
                    "/hes-gateway/terminal/getHomeGatewayList",
                    &[],
                    "franklin gateway list",
                )
                .await?;
            session.gateway_id = gateways
                .first()
                .map(|g| g.id.clone())
                .ok_or_else(|| AppError::Upstream("no gateways on franklin account".into()))?;
            debug!(gateway_id = %session.gateway_id, "discovered gateway");
        }

        Ok(())
    }

    async fn ensure_session<'a>(
        &'a self,
        session: &mut tokio::sync::MutexGuard<'a, Session>,
    ) -> Result<()> {
        let expired = match (session.token.as_ref(), session.token_expiry) {
            (Some(_), Some(expiry)) => expiry <= Utc::now(),
            _ => true,
        };
        if expired {
            self.login(session).await?;
        }
        Ok(())
    }

    async fn get_with_token<T: DeserializeOwned + Default>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<T> {
        let response: VendorResponse<T> = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("loginToken", session.token.as_deref().unwrap_or_default())
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::upstream(context, e))?
            .json()
            .await
            .map_err(|e| AppError::upstream(context, e))?;
        response.into_result(context)
    }

    /// POST a form and require a successful envelope; write endpoints may
    /// omit `result` entirely.
    async fn post_form_with_token(
        &self,
        session: &Session,
        path: &str,
        form: &[(&str, String)],
        context: &str,
    ) -> Result<()> {
        let response: VendorResponse<serde_json::Value> = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("loginToken", session.token.as_deref().unwrap_or_default())
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::upstream(context, e))?
            .json()
            .await
            .map_err(|e| AppError::upstream(context, e))?;
        response.check(context)
    }

    async fn power_control(&self, session: &Session) -> Result<PowerControlSetting> {
        self.get_with_token(
            session,
            "/hes-gateway/terminal/tou/getPowerControlSetting",
            &[("gatewayId", &session.gateway_id)],
            "franklin power control",
        )
        .await
    }

    async fn write_power_control(
        &self,
        session: &Session,
        grid_max_flag: i64,
        grid_feed_max_flag: i64,
        grid_feed_max: f64,
    ) -> Result<()> {
        self.post_form_with_token(
            session,
            "/hes-gateway/terminal/tou/setPowerControlV2",
            &[
                ("gatewayId", session.gateway_id.clone()),
                ("gridMaxFlag", grid_max_flag.to_string()),
                ("gridFeedMaxFlag", grid_feed_max_flag.to_string()),
                ("gridFeedMax", fmt_num(grid_feed_max)),
            ],
            "franklin set power control",
        )
        .await
    }

    async fn tou_list(&self, session: &Session) -> Result<TouList> {
        self.get_with_token(
            session,
            "/hes-gateway/terminal/tou/getGatewayTouListV2",
            &[("gatewayId", &session.gateway_id)],
            "franklin tou list",
        )
        .await
    }

    fn device_zone(info: &DeviceInfo) -> Tz {
        info.zone_info
            .as_deref()
            .and_then(|z| Tz::from_str(z).ok())
            .unwrap_or(chrono_tz::America::Chicago)
    }
}

/// Format a number the way the vendor forms expect: no trailing `.0` on
/// whole values.
fn fmt_num(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[async_trait::async_trait]
impl EssSystem for Franklin {
    async fn get_status(&self) -> Result<SystemStatus> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        let info: DeviceInfo = self
            .get_with_token(
                &session,
                "/hes-gateway/terminal/getDeviceInfoV2",
                &[("gatewayId", &session.gateway_id)],
                "franklin device info",
            )
            .await?;
        let pcs = self.power_control(&session).await?;
        let composite: CompositeInfo = self
            .get_with_token(
                &session,
                "/hes-gateway/terminal/getDeviceCompositeInfo",
                &[("gatewayId", &session.gateway_id)],
                "franklin composite info",
            )
            .await?;

        let runtime = composite.runtime_data;
        Ok(SystemStatus {
            battery_soc: runtime.soc,
            battery_capacity_kwh: info.total_cap,
            max_battery_charge_kw: pcs.global_grid_charge_max,
            battery_kw: runtime.p_fhp / 1000.0,
            solar_kw: runtime.p_sun / 1000.0,
            home_kw: runtime.p_load / 1000.0,
            grid_kw: runtime.p_uti / 1000.0,
            emergency_mode: composite.emergency_mode,
            can_import_battery: pcs.grid_max_flag != FLAG_DISABLED,
            can_export_battery: false,
            can_export_solar: pcs.grid_feed_max_flag != FLAG_DISABLED,
        })
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        let info: DeviceInfo = self
            .get_with_token(
                &session,
                "/hes-gateway/terminal/getDeviceInfoV2",
                &[("gatewayId", &session.gateway_id)],
                "franklin device info",
            )
            .await?;
        let zone = Self::device_zone(&info);

        let mut buckets: HashMap<DateTime<Utc>, HourFlows> = HashMap::new();

        let mut day = start.with_timezone(&zone).date_naive();
        let last_day = end.with_timezone(&zone).date_naive();
        while day <= last_day {
            let day_str = day.format("%Y-%m-%d").to_string();
            let power: PowerByDay = self
                .get_with_token(
                    &session,
                    "/api-energy/power/getFhpPowerByDay",
                    &[
                        ("gatewayId", session.gateway_id.as_str()),
                        ("dayTime", day_str.as_str()),
                    ],
                    "franklin power by day",
                )
                .await?;

            let times: Vec<DateTime<Utc>> = power
                .device_time_array
                .iter()
                .filter_map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
                .filter_map(|naive| zone.from_local_datetime(&naive).single())
                .map(|t| t.with_timezone(&Utc))
                .collect();
            if times.len() != power.device_time_array.len() {
                warn!(day = %day_str, "skipping day with unparseable timestamps");
                day = day + Duration::days(1);
                continue;
            }

            let sample = |arr: &[f64], i: usize| arr.get(i).copied().unwrap_or(0.0);
            for i in 0..times.len().saturating_sub(1) {
                let hours = (times[i + 1] - times[i]).num_seconds() as f64 / 3600.0;
                if hours <= 0.0 {
                    continue;
                }
                let bucket = buckets.entry(truncate_to_hour(times[i])).or_default();
                bucket.solar_to_home += sample(&power.power_solar_home_array, i) * hours;
                bucket.battery_to_home += sample(&power.power_fhp_home_array, i) * hours;
                bucket.solar_to_grid += sample(&power.power_solar_gird_array, i) * hours;
                bucket.solar_to_battery += sample(&power.power_solar_fhp_array, i) * hours;
                bucket.grid_to_battery += sample(&power.power_gird_fhp_array, i) * hours;
                bucket.grid_to_home += sample(&power.power_gird_home_array, i) * hours;
                bucket.battery_to_grid += sample(&power.power_fhp_gird_array, i) * hours;
            }

            day = day + Duration::days(1);
        }

        let window_start = truncate_to_hour(start);
        let mut stats: Vec<EnergyStats> = buckets
            .into_iter()
            .filter(|(hour, _)| *hour >= window_start && *hour < end)
            .map(|(hour, f)| EnergyStats {
                ts_hour_start: hour,
                home_kwh: f.solar_to_home + f.grid_to_home + f.battery_to_home,
                solar_kwh: f.solar_to_home + f.solar_to_grid + f.solar_to_battery,
                grid_import_kwh: f.grid_to_home + f.grid_to_battery,
                grid_export_kwh: f.solar_to_grid + f.battery_to_grid,
                battery_used_kwh: f.battery_to_home + f.battery_to_grid,
                battery_charged_kwh: f.solar_to_battery + f.grid_to_battery,
                solar_to_home_kwh: f.solar_to_home,
                battery_to_home_kwh: f.battery_to_home,
                solar_to_battery_kwh: f.solar_to_battery,
            })
            .collect();
        stats.sort_by_key(|s| s.ts_hour_start);
        Ok(stats)
    }

    async fn apply_settings(&self, settings: &Settings) -> Result<()> {
        settings.validate().map_err(AppError::InvalidInput)?;
        let mut session = self.session.lock().await;
        session.reserve_soc = settings.min_battery_soc;
        session.grid_charge = settings.grid_charge_batteries;
        session.grid_export = settings.grid_export_solar;
        Ok(())
    }

    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<()> {
        if battery == BatteryMode::NoChange && solar == SolarMode::NoChange {
            return Ok(());
        }

        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        // Grid charging needs the power-control flag open before the mode
        // change takes effect.
        if battery == BatteryMode::ChargeAny && session.grid_charge {
            let pcs = self.power_control(&session).await?;
            if pcs.grid_max_flag != FLAG_ENABLED {
                self.write_power_control(
                    &session,
                    FLAG_ENABLED,
                    pcs.grid_feed_max_flag,
                    pcs.grid_feed_max,
                )
                .await?;
            }
        }

        let tou = self.tou_list(&session).await?;

        let (target_id, work_mode, reserve_soc) = match battery {
            BatteryMode::NoChange => {
                // Solar-only change: re-assert the currently-programmed mode.
                let current = tou
                    .currend_id
                    .and_then(|id| tou.list.iter().find(|m| m.id == id))
                    .or_else(|| tou.list.first())
                    .ok_or_else(|| AppError::Upstream("no tou modes on gateway".into()))?;
                (
                    current.id,
                    current.work_mode,
                    current.soc.unwrap_or(session.reserve_soc),
                )
            }
            BatteryMode::ChargeAny => {
                let entry = self_consumption_entry(&tou)?;
                (entry.id, WORK_MODE_SELF_CONSUMPTION, 100.0)
            }
            BatteryMode::Load | BatteryMode::Standby | BatteryMode::ChargeSolar => {
                let entry = self_consumption_entry(&tou)?;
                (entry.id, WORK_MODE_SELF_CONSUMPTION, session.reserve_soc)
            }
        };

        self.post_form_with_token(
            &session,
            "/hes-gateway/terminal/tou/updateTouModeV2",
            &[
                ("gatewayId", session.gateway_id.clone()),
                ("currendId", target_id.to_string()),
                ("workMode", work_mode.to_string()),
                ("soc", fmt_num(reserve_soc)),
            ],
            "franklin update tou mode",
        )
        .await
    }

    async fn set_power_control(&self, config: &PowerControlConfig) -> Result<()> {
        let mut session = self.session.lock().await;
        self.ensure_session(&mut session).await?;

        let current = self.power_control(&session).await?;
        let grid_max_flag = if config.grid_charge_enabled {
            FLAG_ENABLED
        } else {
            FLAG_DISABLED
        };
        let grid_feed_max_flag = if config.grid_export_enabled {
            FLAG_ENABLED
        } else {
            FLAG_DISABLED
        };

        let unchanged = current.grid_max_flag == grid_max_flag
            && current.grid_feed_max_flag == grid_feed_max_flag
            && (current.grid_feed_max - config.grid_export_max).abs() < 1e-9;
        if unchanged {
            return Ok(());
        }

        self.write_power_control(
            &session,
            grid_max_flag,
            grid_feed_max_flag,
            config.grid_export_max,
        )
        .await
    }
}

fn self_consumption_entry(tou: &TouList) -> Result<&TouMode> {
    tou.list
        .iter()
        .find(|m| m.work_mode == WORK_MODE_SELF_CONSUMPTION)
        .ok_or_else(|| AppError::Upstream("gateway has no self-consumption tou mode".into()))
}
