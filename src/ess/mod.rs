mod franklin;

pub use franklin::Franklin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{BatteryMode, EnergyStats, PowerControlConfig, Settings, SolarMode, SystemStatus};

/// The Energy Storage System: battery, inverter, and controller.
///
/// Implementations own their session/token lifecycle against the vendor
/// endpoint and refresh it transparently.
#[async_trait]
pub trait EssSystem: Send + Sync {
    /// Live snapshot of the system.
    async fn get_status(&self) -> Result<SystemStatus>;

    /// Hourly energy flows between `start` and `end`.
    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>>;

    /// Translate the user policy knobs into the system's native
    /// configuration.
    async fn apply_settings(&self, settings: &Settings) -> Result<()>;

    /// Command the battery and solar modes. `(NoChange, NoChange)` is a
    /// no-op.
    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<()>;

    /// Push an explicit power-control configuration.
    async fn set_power_control(&self, config: &PowerControlConfig) -> Result<()>;
}

/// Build the configured ESS adapter. The selection happens exactly once, at
/// startup.
pub fn from_config(config: &Config) -> Result<std::sync::Arc<dyn EssSystem>> {
    match config.ess_provider.as_str() {
        "franklin" => Ok(std::sync::Arc::new(Franklin::new(
            config.franklin_base_url.clone(),
            config.franklin_username.clone(),
            config.franklin_password.clone(),
            config.franklin_gateway_id.clone(),
        )?)),
        other => Err(AppError::InvalidInput(format!(
            "unknown ess provider: {}",
            other
        ))),
    }
}
