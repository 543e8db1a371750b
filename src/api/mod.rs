pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::auth::TokenValidator;
use crate::config::Config;
use crate::controller::Controller;
use crate::ess::EssSystem;
use crate::repositories::Storage;
use crate::utility::UtilityProvider;

/// Auth policy shared by the handlers.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub oidc_audience: String,
    pub update_specific_audience: String,
    pub update_specific_email: String,
    pub admin_emails: Vec<String>,
    pub bypass_auth: bool,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            oidc_audience: config.oidc_audience.clone(),
            update_specific_audience: config.update_specific_audience.clone(),
            update_specific_email: config.update_specific_email.clone(),
            admin_emails: config.admin_emails(),
            bypass_auth: config.bypass_auth,
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.iter().any(|admin| admin == email)
    }

    /// Whether `email` may trigger an update tick.
    pub fn allows_update(&self, email: &str) -> bool {
        (!self.update_specific_email.is_empty() && email == self.update_specific_email)
            || self.is_admin(email)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub utility: Arc<dyn UtilityProvider>,
    pub ess: Arc<dyn EssSystem>,
    pub controller: Arc<Controller>,
    pub validator: Arc<dyn TokenValidator>,
    pub auth: AuthSettings,
    /// Serializes ticks so at most one mutates ESS state at a time.
    pub update_lock: Arc<tokio::sync::Mutex<()>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/update", get(handlers::update::handle_update))
        .route("/api/history/prices", get(handlers::history::prices))
        .route("/api/history/actions", get(handlers::history::actions))
        .route("/api/history/savings", get(handlers::savings::savings))
        .route(
            "/api/settings",
            get(handlers::settings::get_settings).put(handlers::settings::update_settings),
        )
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/status", get(handlers::auth::status))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_cookie,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
}
