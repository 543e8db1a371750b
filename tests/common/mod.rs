#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use ess_autopilot::api::{create_router, AppState, AuthSettings};
use ess_autopilot::auth::{TokenClaims, TokenValidator};
use ess_autopilot::controller::Controller;
use ess_autopilot::error::{AppError, Result};
use ess_autopilot::ess::EssSystem;
use ess_autopilot::models::price::truncate_to_hour;
use ess_autopilot::models::{
    Action, BatteryMode, EnergyStats, PowerControlConfig, Price, Settings, SolarMode, SystemStatus,
};
use ess_autopilot::repositories::Storage;
use ess_autopilot::utility::UtilityProvider;

#[derive(Default)]
pub struct MockStorage {
    pub settings: Mutex<Settings>,
    pub actions: Mutex<Vec<Action>>,
    pub prices: Mutex<HashMap<DateTime<Utc>, Price>>,
    pub energy: Mutex<HashMap<DateTime<Utc>, EnergyStats>>,
}

impl MockStorage {
    pub fn with_settings(settings: Settings) -> Arc<Self> {
        let storage = Self::default();
        *storage.settings.lock().unwrap() = settings;
        Arc::new(storage)
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn get_settings(&self) -> Result<Settings> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn set_settings(&self, settings: &Settings) -> Result<()> {
        *self.settings.lock().unwrap() = settings.clone();
        Ok(())
    }

    async fn upsert_price(&self, price: &Price) -> Result<()> {
        let ts = price
            .ts_start
            .ok_or_else(|| AppError::InvalidInput("price has no start time".into()))?;
        self.prices
            .lock()
            .unwrap()
            .insert(truncate_to_hour(ts), price.clone());
        Ok(())
    }

    async fn get_price_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Price>> {
        let mut prices: Vec<Price> = self
            .prices
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.ts_start.is_some_and(|t| t >= start && t <= end))
            .cloned()
            .collect();
        prices.sort_by_key(|p| p.ts_start);
        Ok(prices)
    }

    async fn get_latest_price_history_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.prices.lock().unwrap().keys().max().copied())
    }

    async fn insert_action(&self, action: &Action) -> Result<()> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(())
    }

    async fn get_action_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Action>> {
        Ok(self
            .actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.timestamp >= start && a.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn upsert_energy_history(&self, stats: &EnergyStats) -> Result<()> {
        self.energy
            .lock()
            .unwrap()
            .insert(truncate_to_hour(stats.ts_hour_start), stats.clone());
        Ok(())
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>> {
        let mut stats: Vec<EnergyStats> = self
            .energy
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.ts_hour_start >= start && s.ts_hour_start <= end)
            .cloned()
            .collect();
        stats.sort_by_key(|s| s.ts_hour_start);
        Ok(stats)
    }

    async fn get_latest_energy_history_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.energy.lock().unwrap().keys().max().copied())
    }

    async fn close(&self) {}
}

pub struct MockUtility {
    pub price: Price,
    pub futures: Vec<Price>,
}

impl MockUtility {
    pub fn with_price(dollars_per_kwh: f64) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            price: Price::new(now, now + chrono::Duration::hours(1), dollars_per_kwh),
            futures: Vec::new(),
        })
    }
}

#[async_trait]
impl UtilityProvider for MockUtility {
    async fn get_current_price(&self) -> Result<Price> {
        Ok(self.price.clone())
    }

    async fn last_confirmed_price(&self) -> Result<Price> {
        Ok(self.price.clone())
    }

    async fn get_future_prices(&self) -> Result<Vec<Price>> {
        Ok(self.futures.clone())
    }
}

#[derive(Default)]
pub struct MockEss {
    pub status: Mutex<SystemStatus>,
    pub fail_set_modes: bool,
    pub status_calls: AtomicUsize,
    pub set_modes_calls: Mutex<Vec<(BatteryMode, SolarMode)>>,
}

impl MockEss {
    pub fn with_status(status: SystemStatus) -> Arc<Self> {
        let ess = Self::default();
        *ess.status.lock().unwrap() = status;
        Arc::new(ess)
    }
}

#[async_trait]
impl EssSystem for MockEss {
    async fn get_status(&self) -> Result<SystemStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_energy_history(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>> {
        Ok(Vec::new())
    }

    async fn apply_settings(&self, _settings: &Settings) -> Result<()> {
        Ok(())
    }

    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<()> {
        self.set_modes_calls.lock().unwrap().push((battery, solar));
        if self.fail_set_modes {
            return Err(AppError::Upstream("vendor rejected the mode".into()));
        }
        Ok(())
    }

    async fn set_power_control(&self, _config: &PowerControlConfig) -> Result<()> {
        Ok(())
    }
}

/// Validates any token to the configured claims; `None` fails validation.
pub struct MockValidator {
    pub claims: Option<TokenClaims>,
    pub seen: Mutex<Vec<(String, String)>>,
}

impl MockValidator {
    pub fn with_email(email: &str) -> Arc<Self> {
        Arc::new(Self {
            claims: Some(TokenClaims {
                email: Some(email.to_string()),
                expires: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
            }),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            claims: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn without_email() -> Arc<Self> {
        Arc::new(Self {
            claims: Some(TokenClaims {
                email: None,
                expires: 0,
            }),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TokenValidator for MockValidator {
    async fn validate(&self, token: &str, audience: &str) -> Result<TokenClaims> {
        self.seen
            .lock()
            .unwrap()
            .push((token.to_string(), audience.to_string()));
        self.claims
            .clone()
            .ok_or_else(|| AppError::Auth("invalid token".into()))
    }
}

pub struct TestApp {
    pub storage: Arc<MockStorage>,
    pub utility: Arc<MockUtility>,
    pub ess: Arc<MockEss>,
    pub validator: Arc<MockValidator>,
    pub auth: AuthSettings,
}

impl TestApp {
    pub fn new() -> Self {
        Self {
            storage: MockStorage::with_settings(Settings::default()),
            utility: MockUtility::with_price(0.15),
            ess: MockEss::with_status(SystemStatus::default()),
            validator: MockValidator::with_email("admin@example.com"),
            auth: AuthSettings {
                bypass_auth: true,
                ..AuthSettings::default()
            },
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(AppState {
            storage: self.storage.clone(),
            utility: self.utility.clone(),
            ess: self.ess.clone(),
            controller: Arc::new(Controller::new(chrono_tz::America::Chicago)),
            validator: self.validator.clone(),
            auth: self.auth.clone(),
            update_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
