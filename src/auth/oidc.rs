use alcoholic_jwt::{token_kid, validate, Validation, JWKS};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, Result};

use super::{TokenClaims, TokenValidator};

/// JWKS-backed RS256 ID-token validation with issuer, audience, and expiry
/// checks. The key set is fetched lazily and refreshed when an unknown key
/// id shows up (provider key rotation).
pub struct JwksValidator {
    client: reqwest::Client,
    jwks_url: String,
    issuer: String,
    jwks: RwLock<Option<JWKS>>,
}

impl JwksValidator {
    pub fn new(jwks_url: String, issuer: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ess-autopilot")
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::upstream("building jwks client", e))?;
        Ok(Self {
            client,
            jwks_url,
            issuer,
            jwks: RwLock::new(None),
        })
    }

    async fn fetch_jwks(&self) -> Result<JWKS> {
        debug!(url = %self.jwks_url, "fetching jwks");
        let jwks: JWKS = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AppError::upstream("fetching jwks", e))?
            .json()
            .await
            .map_err(|e| AppError::upstream("decoding jwks", e))?;
        Ok(jwks)
    }

    /// Make sure the cached key set contains `kid`, refetching once if it
    /// does not (provider key rotation).
    async fn ensure_key(&self, kid: &str) -> Result<()> {
        {
            let cached = self.jwks.read().await;
            if let Some(jwks) = cached.as_ref() {
                if jwks.find(kid).is_some() {
                    return Ok(());
                }
            }
        }

        let fresh = self.fetch_jwks().await?;
        let mut cached = self.jwks.write().await;
        *cached = Some(fresh);
        Ok(())
    }
}

#[async_trait]
impl TokenValidator for JwksValidator {
    async fn validate(&self, token: &str, audience: &str) -> Result<TokenClaims> {
        let kid = token_kid(token)
            .map_err(|e| AppError::Auth(format!("invalid token: {:?}", e)))?
            .ok_or_else(|| AppError::Auth("token has no key id".into()))?;

        self.ensure_key(&kid).await?;
        let guard = self.jwks.read().await;
        let jwks = guard
            .as_ref()
            .ok_or_else(|| AppError::Auth("no key set available".into()))?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AppError::Auth("token signed by unknown key".into()))?;

        let validations = vec![
            Validation::Issuer(self.issuer.clone()),
            Validation::Audience(audience.to_string()),
            Validation::SubjectPresent,
            Validation::NotExpired,
        ];
        let valid = validate(token, jwk, validations)
            .map_err(|e| AppError::Auth(format!("invalid token: {:?}", e)))?;

        let email = valid.claims["email"].as_str().map(str::to_string);
        let expires = valid.claims["exp"].as_i64().unwrap_or(0);
        Ok(TokenClaims { email, expires })
    }
}
