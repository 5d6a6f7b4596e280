//! The credential triple and its derived validity.
//!
//! A triple is either complete or absent. [`StoredCredentials`] is the on-disk
//! shape; it tolerates missing fields when reading so that a partial blob can
//! be detected and rejected instead of failing deserialization.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::AuthError;
use crate::traits::{CredentialsError, Headers, TokenSet};

/// Identity, access and refresh tokens of one authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialTriple {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialTriple {
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Build a triple from a login response. Login must return all three tokens.
    pub fn from_login(tokens: TokenSet) -> Result<Self, AuthError> {
        let refresh_token = tokens
            .refresh_token
            .ok_or_else(|| AuthError::InvalidCredentials {
                message: "login response did not include a refresh token".to_string(),
            })?;
        let triple = Self::new(tokens.id_token, tokens.access_token, refresh_token);
        triple.validate()?;
        Ok(triple)
    }

    /// Apply a refresh response, keeping the current refresh token when the
    /// response does not rotate it.
    pub fn refreshed(&self, tokens: TokenSet) -> Result<Self, AuthError> {
        let refresh_token = tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.refresh_token.clone());
        let triple = Self::new(tokens.id_token, tokens.access_token, refresh_token);
        triple.validate()?;
        Ok(triple)
    }

    /// Reject triples with an empty part.
    pub fn validate(&self) -> Result<(), AuthError> {
        match self.missing_part() {
            Some(part) => Err(AuthError::InvalidCredentials {
                message: format!("{} is empty", part),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn missing_part(&self) -> Option<&'static str> {
        if self.id_token.is_empty() {
            Some("id_token")
        } else if self.access_token.is_empty() {
            Some("access_token")
        } else if self.refresh_token.is_empty() {
            Some("refresh_token")
        } else {
            None
        }
    }

    /// Expiry claim of the identity token, if it decodes.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        jwt_expiry(&self.id_token).and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// True iff the identity token decodes and expires after `now + buffer`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        let Some(expires_at) = self.expires_at() else {
            return false;
        };
        let buffer = chrono::Duration::from_std(buffer).unwrap_or_else(|_| chrono::Duration::zero());
        expires_at > now + buffer
    }

    pub fn headers(&self) -> AuthHeaders {
        AuthHeaders {
            access_token: self.access_token.clone(),
            id_token: self.id_token.clone(),
        }
    }
}

impl fmt::Debug for CredentialTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialTriple")
            .field("id_token", &redact(&self.id_token))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    if token.chars().count() <= 8 {
        "***".to_string()
    } else {
        format!("{}***", token.chars().take(8).collect::<String>())
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Decode the `exp` claim (seconds since epoch) of a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}

/// Headers derived from the current triple.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub access_token: String,
    pub id_token: String,
}

impl AuthHeaders {
    /// Bearer authorization value for API requests.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    pub fn as_headers(&self) -> Headers {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), self.authorization());
        headers
    }
}

impl fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeaders")
            .field("access_token", &redact(&self.access_token))
            .field("id_token", &redact(&self.id_token))
            .finish()
    }
}

/// On-disk credential blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredCredentials {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp of the last write.
    #[serde(default)]
    pub saved_at: Option<i64>,
}

impl StoredCredentials {
    pub fn from_triple(triple: &CredentialTriple) -> Self {
        Self {
            id_token: Some(triple.id_token.clone()),
            access_token: Some(triple.access_token.clone()),
            refresh_token: Some(triple.refresh_token.clone()),
            saved_at: Some(Utc::now().timestamp()),
        }
    }

    /// `Ok(None)` when nothing is stored, an error when only part of a triple is.
    pub fn into_triple(self) -> Result<Option<CredentialTriple>, CredentialsError> {
        let parts = [
            ("id_token", non_empty(self.id_token)),
            ("access_token", non_empty(self.access_token)),
            ("refresh_token", non_empty(self.refresh_token)),
        ];

        if parts.iter().all(|(_, v)| v.is_none()) {
            return Ok(None);
        }
        if let Some((name, _)) = parts.iter().find(|(_, v)| v.is_none()) {
            return Err(CredentialsError::Incomplete(format!("{} is missing", name)));
        }

        let [(_, Some(id)), (_, Some(access)), (_, Some(refresh))] = parts else {
            return Ok(None);
        };
        Ok(Some(CredentialTriple::new(id, access, refresh)))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
