use clap::Parser;

/// Process configuration, constructed once in `main` and passed down.
#[derive(Parser, Debug, Clone)]
#[command(name = "ess-autopilot", about = "Battery ESS automation service")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Utility provider to use (available: comed).
    #[arg(long, default_value = "comed")]
    pub utility_provider: String,

    /// Energy Storage System provider to use (available: franklin).
    #[arg(long, default_value = "franklin")]
    pub ess_provider: String,

    /// IANA time zone used for the daylight window of the deficit
    /// projection.
    #[arg(long, default_value = "America/Chicago")]
    pub timezone: String,

    /// OIDC audience (client id) expected on browser session tokens.
    #[arg(long, env = "OIDC_AUDIENCE", default_value = "")]
    pub oidc_audience: String,

    /// Audience expected on scheduler-issued tokens for /api/update.
    #[arg(long, env = "UPDATE_SPECIFIC_AUDIENCE", default_value = "")]
    pub update_specific_audience: String,

    /// Service-account email allowed to trigger /api/update.
    #[arg(long, env = "UPDATE_SPECIFIC_EMAIL", default_value = "")]
    pub update_specific_email: String,

    /// Comma-separated admin emails.
    #[arg(long, env = "ADMIN_EMAILS", value_delimiter = ',', default_value = "")]
    pub admin_emails: Vec<String>,

    /// Disable all auth checks (local development only).
    #[arg(long, default_value_t = false)]
    pub bypass_auth: bool,

    /// JWKS endpoint used to validate OIDC ID tokens.
    #[arg(
        long,
        env = "OIDC_JWKS_URL",
        default_value = "https://www.googleapis.com/oauth2/v3/certs"
    )]
    pub oidc_jwks_url: String,

    /// Issuer expected on OIDC ID tokens.
    #[arg(long, env = "OIDC_ISSUER", default_value = "https://accounts.google.com")]
    pub oidc_issuer: String,

    /// ComEd 5-minute price feed URL.
    #[arg(
        long,
        env = "COMED_API_URL",
        default_value = "https://hourlypricing.comed.com/api?type=5minutefeed"
    )]
    pub comed_api_url: String,

    /// PJM Data Miner API key for day-ahead prices; future prices are
    /// disabled when empty.
    #[arg(long, env = "PJM_API_KEY", default_value = "")]
    pub pjm_api_key: String,

    #[arg(
        long,
        env = "PJM_API_URL",
        default_value = "https://api.pjm.com/api/v1/da_hrl_lmps"
    )]
    pub pjm_api_url: String,

    /// FranklinWH cloud endpoint.
    #[arg(
        long,
        env = "FRANKLIN_BASE_URL",
        default_value = "https://energy.franklinwh.com"
    )]
    pub franklin_base_url: String,

    #[arg(long, env = "FRANKLIN_USERNAME", default_value = "")]
    pub franklin_username: String,

    #[arg(long, env = "FRANKLIN_PASSWORD", default_value = "")]
    pub franklin_password: String,

    /// Gateway id; auto-discovered from the account when empty.
    #[arg(long, env = "FRANKLIN_GATEWAY_ID", default_value = "")]
    pub franklin_gateway_id: String,
}

impl Config {
    /// Admin emails with empty entries dropped (a trailing comma in the env
    /// var must not admit the empty email).
    pub fn admin_emails(&self) -> Vec<String> {
        self.admin_emails
            .iter()
            .filter(|e| !e.is_empty())
            .cloned()
            .collect()
    }
}
