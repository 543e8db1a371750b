mod postgres;

pub use postgres::PgStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Action, EnergyStats, Price, Settings};

/// The persistence contract: settings, price history keyed by hour, the
/// action log, and hourly energy history keyed by hour.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_settings(&self) -> Result<Settings>;
    async fn set_settings(&self, settings: &Settings) -> Result<()>;

    /// Upsert a price keyed by its hour; re-upserting overwrites.
    async fn upsert_price(&self, price: &Price) -> Result<()>;
    async fn get_price_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Price>>;
    async fn get_latest_price_history_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Append one decision to the action log.
    async fn insert_action(&self, action: &Action) -> Result<()>;
    async fn get_action_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Action>>;

    /// Upsert one hour of energy flows; re-upserting overwrites.
    async fn upsert_energy_history(&self, stats: &EnergyStats) -> Result<()>;
    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>>;
    async fn get_latest_energy_history_time(&self) -> Result<Option<DateTime<Utc>>>;

    async fn close(&self);
}
