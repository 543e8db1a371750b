use axum::{extract::State, http::StatusCode, response::Json, Extension};
use tracing::{error, info, warn};

use crate::api::middleware::AuthedEmail;
use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::Settings;

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>> {
    let settings = state.storage.get_settings().await.map_err(|e| {
        error!("failed to get settings: {}", e);
        AppError::Upstream("failed to get settings".into())
    })?;
    Ok(Json(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    email: Option<Extension<AuthedEmail>>,
    Json(new_settings): Json<Settings>,
) -> Result<StatusCode> {
    if !state.auth.bypass_auth {
        // A misconfigured (empty) admin list must not allow updates.
        if state.auth.admin_emails.is_empty() {
            return Err(AppError::Forbidden("settings updates are disabled".into()));
        }

        let email = email
            .map(|Extension(AuthedEmail(e))| e)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::Auth("missing authentication".into()))?;

        if !state.auth.is_admin(&email) {
            warn!(email = %email, "unauthorized email for settings update");
            return Err(AppError::Forbidden("unauthorized email".into()));
        }
    }

    new_settings
        .validate()
        .map_err(|e| AppError::InvalidInput(format!("invalid settings values: {}", e)))?;

    state.storage.set_settings(&new_settings).await.map_err(|e| {
        error!("failed to save settings: {}", e);
        AppError::Upstream("failed to save settings".into())
    })?;

    info!("settings updated");
    Ok(StatusCode::OK)
}
