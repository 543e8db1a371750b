use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::models::price::truncate_to_hour;
use crate::models::{Action, EnergyStats, Price, Settings};

use super::Storage;

/// Postgres-backed storage. Prices and energy history are keyed by their
/// hour start; actions are append-only.
#[derive(Clone)]
pub struct PgStorage {
    pool: DbPool,
}

impl PgStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn get_settings(&self) -> Result<Settings> {
        let row = sqlx::query(
            "SELECT dry_run, pause, always_charge_under_dollars_per_kwh,
                    additional_fees_dollars_per_kwh,
                    min_arbitrage_difference_dollars_per_kwh, min_battery_soc,
                    grid_charge_batteries, grid_export_solar,
                    ignore_hour_usage_over_multiple
             FROM settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Settings::default());
        };

        Ok(Settings {
            dry_run: row.get("dry_run"),
            pause: row.get("pause"),
            always_charge_under_dollars_per_kwh: row.get("always_charge_under_dollars_per_kwh"),
            additional_fees_dollars_per_kwh: row.get("additional_fees_dollars_per_kwh"),
            min_arbitrage_difference_dollars_per_kwh: row
                .get("min_arbitrage_difference_dollars_per_kwh"),
            min_battery_soc: row.get("min_battery_soc"),
            grid_charge_batteries: row.get("grid_charge_batteries"),
            grid_export_solar: row.get("grid_export_solar"),
            ignore_hour_usage_over_multiple: row.get("ignore_hour_usage_over_multiple"),
        })
    }

    async fn set_settings(&self, settings: &Settings) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (id, dry_run, pause,
                    always_charge_under_dollars_per_kwh,
                    additional_fees_dollars_per_kwh,
                    min_arbitrage_difference_dollars_per_kwh, min_battery_soc,
                    grid_charge_batteries, grid_export_solar,
                    ignore_hour_usage_over_multiple)
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                    dry_run = EXCLUDED.dry_run,
                    pause = EXCLUDED.pause,
                    always_charge_under_dollars_per_kwh = EXCLUDED.always_charge_under_dollars_per_kwh,
                    additional_fees_dollars_per_kwh = EXCLUDED.additional_fees_dollars_per_kwh,
                    min_arbitrage_difference_dollars_per_kwh = EXCLUDED.min_arbitrage_difference_dollars_per_kwh,
                    min_battery_soc = EXCLUDED.min_battery_soc,
                    grid_charge_batteries = EXCLUDED.grid_charge_batteries,
                    grid_export_solar = EXCLUDED.grid_export_solar,
                    ignore_hour_usage_over_multiple = EXCLUDED.ignore_hour_usage_over_multiple",
        )
        .bind(settings.dry_run)
        .bind(settings.pause)
        .bind(settings.always_charge_under_dollars_per_kwh)
        .bind(settings.additional_fees_dollars_per_kwh)
        .bind(settings.min_arbitrage_difference_dollars_per_kwh)
        .bind(settings.min_battery_soc)
        .bind(settings.grid_charge_batteries)
        .bind(settings.grid_export_solar)
        .bind(settings.ignore_hour_usage_over_multiple)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_price(&self, price: &Price) -> Result<()> {
        let ts_start = price
            .ts_start
            .ok_or_else(|| AppError::InvalidInput("price has no start time".into()))?;
        let hour_start = truncate_to_hour(ts_start);
        let hour_end = price
            .ts_end
            .unwrap_or_else(|| hour_start + Duration::hours(1));

        sqlx::query(
            "INSERT INTO price_history (hour_start, hour_end, dollars_per_kwh)
             VALUES ($1, $2, $3)
             ON CONFLICT (hour_start) DO UPDATE SET
                    hour_end = EXCLUDED.hour_end,
                    dollars_per_kwh = EXCLUDED.dollars_per_kwh",
        )
        .bind(hour_start)
        .bind(hour_end)
        .bind(price.dollars_per_kwh)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_price_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Price>> {
        let rows = sqlx::query(
            "SELECT hour_start, hour_end, dollars_per_kwh
             FROM price_history
             WHERE hour_start >= $1 AND hour_start <= $2
             ORDER BY hour_start",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Price {
                ts_start: Some(row.get("hour_start")),
                ts_end: Some(row.get("hour_end")),
                dollars_per_kwh: row.get("dollars_per_kwh"),
            })
            .collect())
    }

    async fn get_latest_price_history_time(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(hour_start) AS latest FROM price_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("latest"))
    }

    async fn insert_action(&self, action: &Action) -> Result<()> {
        sqlx::query(
            "INSERT INTO actions (ts, battery_mode, solar_mode, description,
                    price_dollars_per_kwh, price_hour_start, dry_run)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(action.timestamp)
        .bind(action.battery_mode.to_string())
        .bind(action.solar_mode.to_string())
        .bind(&action.description)
        .bind(action.current_price.dollars_per_kwh)
        .bind(action.current_price.ts_start)
        .bind(action.dry_run)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_action_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Action>> {
        let rows = sqlx::query(
            "SELECT ts, battery_mode, solar_mode, description,
                    price_dollars_per_kwh, price_hour_start, dry_run
             FROM actions
             WHERE ts >= $1 AND ts <= $2
             ORDER BY ts",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let battery_mode: String = row.get("battery_mode");
                let solar_mode: String = row.get("solar_mode");
                let price_hour_start: Option<DateTime<Utc>> = row.get("price_hour_start");
                Ok(Action {
                    timestamp: row.get("ts"),
                    battery_mode: battery_mode
                        .parse()
                        .map_err(|e: String| AppError::Internal(e))?,
                    solar_mode: solar_mode.parse().map_err(|e: String| AppError::Internal(e))?,
                    description: row.get("description"),
                    current_price: Price {
                        ts_start: price_hour_start,
                        ts_end: price_hour_start.map(|t| t + Duration::hours(1)),
                        dollars_per_kwh: row.get("price_dollars_per_kwh"),
                    },
                    dry_run: row.get("dry_run"),
                })
            })
            .collect()
    }

    async fn upsert_energy_history(&self, stats: &EnergyStats) -> Result<()> {
        sqlx::query(
            "INSERT INTO energy_history (hour_start, home_kwh, solar_kwh,
                    grid_import_kwh, grid_export_kwh, battery_used_kwh,
                    battery_charged_kwh, solar_to_home_kwh, battery_to_home_kwh,
                    solar_to_battery_kwh)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (hour_start) DO UPDATE SET
                    home_kwh = EXCLUDED.home_kwh,
                    solar_kwh = EXCLUDED.solar_kwh,
                    grid_import_kwh = EXCLUDED.grid_import_kwh,
                    grid_export_kwh = EXCLUDED.grid_export_kwh,
                    battery_used_kwh = EXCLUDED.battery_used_kwh,
                    battery_charged_kwh = EXCLUDED.battery_charged_kwh,
                    solar_to_home_kwh = EXCLUDED.solar_to_home_kwh,
                    battery_to_home_kwh = EXCLUDED.battery_to_home_kwh,
                    solar_to_battery_kwh = EXCLUDED.solar_to_battery_kwh",
        )
        .bind(truncate_to_hour(stats.ts_hour_start))
        .bind(stats.home_kwh)
        .bind(stats.solar_kwh)
        .bind(stats.grid_import_kwh)
        .bind(stats.grid_export_kwh)
        .bind(stats.battery_used_kwh)
        .bind(stats.battery_charged_kwh)
        .bind(stats.solar_to_home_kwh)
        .bind(stats.battery_to_home_kwh)
        .bind(stats.solar_to_battery_kwh)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>> {
        let rows = sqlx::query(
            "SELECT hour_start, home_kwh, solar_kwh, grid_import_kwh,
                    grid_export_kwh, battery_used_kwh, battery_charged_kwh,
                    solar_to_home_kwh, battery_to_home_kwh, solar_to_battery_kwh
             FROM energy_history
             WHERE hour_start >= $1 AND hour_start <= $2
             ORDER BY hour_start",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EnergyStats {
                ts_hour_start: row.get("hour_start"),
                home_kwh: row.get("home_kwh"),
                solar_kwh: row.get("solar_kwh"),
                grid_import_kwh: row.get("grid_import_kwh"),
                grid_export_kwh: row.get("grid_export_kwh"),
                battery_used_kwh: row.get("battery_used_kwh"),
                battery_charged_kwh: row.get("battery_charged_kwh"),
                solar_to_home_kwh: row.get("solar_to_home_kwh"),
                battery_to_home_kwh: row.get("battery_to_home_kwh"),
                solar_to_battery_kwh: row.get("solar_to_battery_kwh"),
            })
            .collect())
    }

    async fn get_latest_energy_history_time(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(hour_start) AS latest FROM energy_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("latest"))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
