use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use ess_autopilot::api::{self, AppState, AuthSettings};
use ess_autopilot::auth::JwksValidator;
use ess_autopilot::controller::Controller;
use ess_autopilot::repositories::PgStorage;
use ess_autopilot::{create_pool, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Starting ess-autopilot");

    let config = Config::parse();

    let pool = create_pool(&config).await?;
    info!("Connected to database");

    let timezone = chrono_tz::Tz::from_str(&config.timezone)
        .map_err(|e| anyhow::anyhow!("invalid --timezone {}: {}", config.timezone, e))?;

    let utility = ess_autopilot::utility::from_config(&config)?;
    let ess = ess_autopilot::ess::from_config(&config)?;
    info!(
        utility = %config.utility_provider,
        ess = %config.ess_provider,
        "Providers configured"
    );

    let validator = Arc::new(JwksValidator::new(
        config.oidc_jwks_url.clone(),
        config.oidc_issuer.clone(),
    )?);

    let state = AppState {
        storage: Arc::new(PgStorage::new(pool)),
        utility,
        ess,
        controller: Arc::new(Controller::new(timezone)),
        validator,
        auth: AuthSettings::from_config(&config),
        update_lock: Arc::new(tokio::sync::Mutex::new(())),
    };

    let storage = state.storage.clone();
    let router = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.listen_addr, e))?;
    info!("API server listening on {}", config.listen_addr);

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "API server error");
    }

    storage.close().await;
    info!("Application shutdown complete");
    Ok(())
}
