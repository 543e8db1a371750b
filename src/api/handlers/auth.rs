use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::middleware::{clear_cookie, session_cookie, AuthedEmail};
use crate::api::AppState;
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthStatusResponse {
    #[serde(rename = "loggedIn")]
    pub logged_in: bool,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
    #[serde(rename = "email")]
    pub email: String,
    #[serde(rename = "authRequired")]
    pub auth_required: bool,
    #[serde(rename = "clientID")]
    pub client_id: String,
}

/// Exchange a validated OIDC ID token for a browser session cookie.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response> {
    let claims = state
        .validator
        .validate(&request.token, &state.auth.oidc_audience)
        .await
        .map_err(|e| {
            warn!("failed to validate id token: {}", e);
            AppError::Auth("invalid id token".into())
        })?;

    let email = claims
        .email
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::Auth("invalid oidc claims".into()))?;

    info!(email = %email, "login successful");

    let expires = Utc
        .timestamp_opt(claims.expires, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, session_cookie(&request.token, expires));
    Ok(response)
}

pub async fn logout() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, clear_cookie());
    response
}

pub async fn status(
    State(state): State<AppState>,
    email: Option<Extension<AuthedEmail>>,
) -> Json<AuthStatusResponse> {
    let email = email
        .map(|Extension(AuthedEmail(e))| e)
        .unwrap_or_default();
    let mut logged_in = !email.is_empty();
    let mut is_admin = logged_in && state.auth.is_admin(&email);

    if state.auth.bypass_auth {
        logged_in = true;
        is_admin = true;
    }

    Json(AuthStatusResponse {
        logged_in,
        is_admin,
        email,
        auth_required: !state.auth.oidc_audience.is_empty(),
        client_id: state.auth.oidc_audience.clone(),
    })
}
