mod oidc;

pub use oidc::JwksValidator;

use async_trait::async_trait;

use crate::error::Result;

/// Claims extracted from a validated OIDC ID token.
#[derive(Debug, Clone, Default)]
pub struct TokenClaims {
    pub email: Option<String>,
    /// Unix seconds at which the token expires.
    pub expires: i64,
}

/// Validates an OIDC ID token against an expected audience.
///
/// A trait so the HTTP layer can be exercised without a live identity
/// provider.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str, audience: &str) -> Result<TokenClaims>;
}
