//! Identity provider trait.

use async_trait::async_trait;

use crate::error::AuthError;

/// Tokens returned by a successful login or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    /// Refresh responses usually omit this; the previous token stays valid.
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Upstream identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a username and password for a token set.
    ///
    /// Interactive challenges (new password, MFA) are reported as
    /// [`AuthError::ChallengeRequired`].
    async fn login(&self, username: &str, password: &str) -> Result<TokenSet, AuthError>;

    /// Exchange a refresh token for fresh identity and access tokens.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}
