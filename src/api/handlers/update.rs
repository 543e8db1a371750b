use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::api::middleware::AuthedEmail;
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::price::truncate_to_hour;
use crate::models::{BatteryMode, SolarMode};

/// How far back history is synced and how much of it feeds the controller.
const HISTORY_WINDOW_HOURS: i64 = 72;

/// One decision tick: authorize, sync, gate, decide, command, record.
///
/// Ticks are serialized process-wide; partial upstream failures degrade the
/// decision inputs instead of failing the tick.
pub async fn handle_update(
    State(state): State<AppState>,
    email: Option<Extension<AuthedEmail>>,
    headers: HeaderMap,
) -> Result<Response> {
    authorize(&state, email, &headers).await?;

    let _tick = state.update_lock.lock().await;

    // 1. Settings, pushed to the ESS. Both fatal: there is no sensible
    // default policy to fall back to.
    let settings = state.storage.get_settings().await.map_err(|e| {
        error!("failed to get settings: {}", e);
        AppError::Upstream("failed to get settings".into())
    })?;
    state.ess.apply_settings(&settings).await.map_err(|e| {
        error!("failed to apply settings: {}", e);
        AppError::Upstream("failed to apply settings".into())
    })?;
    debug!("update: settings applied");

    // 2. Sync the last confirmed price. Non-fatal.
    match state.utility.last_confirmed_price().await {
        Ok(price) => {
            if let Err(e) = state.storage.upsert_price(&price).await {
                error!("failed to upsert price: {}", e);
            }
        }
        Err(e) => error!("failed to get last confirmed price: {}", e),
    }
    debug!("update: price synced");

    // 3. Sync energy history from the last stored hour. Non-fatal per item.
    {
        let last = match state.storage.get_latest_energy_history_time().await {
            Ok(last) => last,
            Err(e) => {
                warn!("failed to get latest energy history time: {}", e);
                None
            }
        };

        // At most the window, but resume from the last stored record
        // truncated to its hour in case that hour was incomplete.
        let mut sync_start = Utc::now() - Duration::hours(HISTORY_WINDOW_HOURS);
        if let Some(last) = last {
            if last > sync_start {
                sync_start = truncate_to_hour(last);
            }
        }
        debug!(since = %sync_start, "syncing energy history");

        match state.ess.get_energy_history(sync_start, Utc::now()).await {
            Ok(history) => {
                for stats in &history {
                    if let Err(e) = state.storage.upsert_energy_history(stats).await {
                        error!("failed to upsert energy history: {}", e);
                    }
                }
            }
            Err(e) => error!("failed to get energy history from ess: {}", e),
        }
    }
    debug!("update: history synced");

    // 4. Pause gate. 200 so the scheduler doesn't treat it as a failure.
    if settings.pause {
        info!("update: paused");
        return Ok(Json(json!({ "status": "paused" })).into_response());
    }

    // 5. Live status. Fatal.
    let status = state.ess.get_status().await.map_err(|e| {
        error!("failed to get ess status: {}", e);
        AppError::Upstream("failed to get ess status".into())
    })?;
    debug!("update: ess status fetched");

    // 6. Emergency gate: no commands while the ESS is in backup mode.
    if status.emergency_mode {
        info!("update: emergency mode");
        return Ok(Json(json!({ "status": "emergency mode" })).into_response());
    }

    // 7. Decision inputs: current price fatal, the rest degrade to empty.
    let current_price = state.utility.get_current_price().await.map_err(|e| {
        error!("failed to get price: {}", e);
        AppError::Upstream("failed to get price".into())
    })?;

    let future_prices = match state.utility.get_future_prices().await {
        Ok(prices) => prices,
        Err(e) => {
            warn!("failed to get future prices: {}", e);
            Vec::new()
        }
    };

    let now = Utc::now();
    let history = match state
        .storage
        .get_energy_history(now - Duration::hours(HISTORY_WINDOW_HOURS), now)
        .await
    {
        Ok(history) => history,
        Err(e) => {
            warn!("failed to get energy history from storage: {}", e);
            Vec::new()
        }
    };

    debug!("update: starting decision");

    // 8. Decide.
    let mut action = state.controller.decide(
        &status,
        &current_price,
        &future_prices,
        &history,
        &settings,
    );
    debug!(
        battery_mode = %action.battery_mode,
        solar_mode = %action.solar_mode,
        description = %action.description,
        "update: decision made"
    );

    // 9. Execute. The solar mode is forced to Any at the command layer so
    // generation capability never depends on the export decision.
    let command = match action.battery_mode {
        BatteryMode::ChargeAny | BatteryMode::Load | BatteryMode::Standby => {
            Some(action.battery_mode)
        }
        BatteryMode::NoChange | BatteryMode::ChargeSolar => None,
    };
    if let Some(mode) = command {
        if let Err(e) = state.ess.set_modes(mode, SolarMode::Any).await {
            error!("failed to set mode: {}", e);
            action.description.push_str(&format!(" (FAILED: {})", e));
        }
    }
    if settings.dry_run {
        action.dry_run = true;
    }

    // 10. Record. Non-fatal.
    if let Err(e) = state.storage.insert_action(&action).await {
        error!("failed to insert action: {}", e);
    }

    Ok(Json(json!({
        "status": "success",
        "action": action,
        "price": current_price,
    }))
    .into_response())
}

/// The tick trigger accepts a cookie-authenticated admin or a
/// scheduler-issued bearer token for the update audience.
async fn authorize(
    state: &AppState,
    email: Option<Extension<AuthedEmail>>,
    headers: &HeaderMap,
) -> Result<()> {
    let cookie_email = email
        .map(|Extension(AuthedEmail(e))| e)
        .filter(|e| !e.is_empty());

    if let Some(email) = cookie_email {
        if !state.auth.allows_update(&email) {
            warn!(email = %email, "unauthorized email for update");
            return Err(AppError::Forbidden("unauthorized email".into()));
        }
        debug!(email = %email, "update: authorized");
        return Ok(());
    }

    let scheduler_auth_configured = !state.auth.update_specific_audience.is_empty()
        && (!state.auth.update_specific_email.is_empty() || !state.auth.admin_emails.is_empty());
    if scheduler_auth_configured {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Auth("missing authorization header".into()))?;

        let mut parts = auth_header.splitn(2, ' ');
        let token = match (parts.next(), parts.next()) {
            (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => token,
            _ => return Err(AppError::Auth("invalid authorization header".into())),
        };

        let claims = state
            .validator
            .validate(token, &state.auth.update_specific_audience)
            .await
            .map_err(|e| {
                warn!("failed to validate id token: {}", e);
                AppError::Auth("invalid id token".into())
            })?;

        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::Forbidden("invalid token claims".into()))?;

        if !state.auth.allows_update(&email) {
            warn!(email = %email, "unauthorized email for update");
            return Err(AppError::Forbidden("unauthorized email".into()));
        }
        debug!(email = %email, "update: authorized");
        return Ok(());
    }

    if !state.auth.bypass_auth {
        warn!("missing authentication for update");
        return Err(AppError::Auth("missing authentication".into()));
    }
    Ok(())
}
