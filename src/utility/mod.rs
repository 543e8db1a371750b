mod comed;

pub use comed::ComEd;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Price;

/// A source of real-time energy prices.
#[async_trait]
pub trait UtilityProvider: Send + Sync {
    /// The current price of electricity.
    async fn get_current_price(&self) -> Result<Price>;

    /// The most recent price whose interval has fully elapsed.
    async fn last_confirmed_price(&self) -> Result<Price>;

    /// Known future hourly prices; empty when the provider has none.
    async fn get_future_prices(&self) -> Result<Vec<Price>>;
}

/// Build the configured provider. The selection happens exactly once, at
/// startup.
pub fn from_config(config: &Config) -> Result<std::sync::Arc<dyn UtilityProvider>> {
    match config.utility_provider.as_str() {
        "comed" => Ok(std::sync::Arc::new(ComEd::new(
            config.comed_api_url.clone(),
            config.pjm_api_key.clone(),
            config.pjm_api_url.clone(),
        )?)),
        other => Err(AppError::InvalidInput(format!(
            "unknown utility provider: {}",
            other
        ))),
    }
}
