//! Client for the vendor's identity service.
//!
//! The service speaks the Cognito `InitiateAuth` JSON protocol: a single POST
//! endpoint selected by the `X-Amz-Target` header, with `USER_PASSWORD_AUTH`
//! for login and `REFRESH_TOKEN_AUTH` for refresh.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::traits::{Headers, HttpClient, IdentityProvider, Response, TokenSet};

const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Error types the service uses for rejected credentials or tokens.
const REJECTION_TYPES: &[&str] = &["NotAuthorizedException", "UserNotFoundException"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: String,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(default, alias = "Message")]
    message: String,
}

impl ServiceError {
    /// `__type` may carry a namespace prefix (`com.amazon...#NotAuthorizedException`).
    fn short_type(&self) -> &str {
        self.error_type.rsplit('#').next().unwrap_or(&self.error_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Flow {
    Login,
    Refresh,
}

/// [`IdentityProvider`] backed by the identity service's HTTP API.
pub struct IdentityApiClient {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    client_id: String,
}

impl IdentityApiClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn initiate_auth(
        &self,
        flow: Flow,
        parameters: serde_json::Value,
    ) -> Result<TokenSet, AuthError> {
        let auth_flow = match flow {
            Flow::Login => "USER_PASSWORD_AUTH",
            Flow::Refresh => "REFRESH_TOKEN_AUTH",
        };
        let body = serde_json::json!({
            "AuthFlow": auth_flow,
            "ClientId": self.client_id,
            "AuthParameters": parameters,
        });

        let mut headers: Headers = HashMap::new();
        headers.insert("Content-Type".to_string(), CONTENT_TYPE.to_string());
        headers.insert("X-Amz-Target".to_string(), INITIATE_AUTH_TARGET.to_string());

        debug!(flow = auth_flow, endpoint = %self.endpoint, "Calling identity service");

        let response = self
            .http
            .post(&self.endpoint, &body.to_string(), &headers)
            .await
            .map_err(|e| match flow {
                Flow::Login => AuthError::ApiError {
                    status: 0,
                    message: e.to_string(),
                },
                Flow::Refresh => AuthError::RefreshFailed {
                    message: e.to_string(),
                },
            })?;

        if !response.is_success() {
            return Err(Self::classify_failure(flow, &response));
        }

        let parsed: InitiateAuthResponse = response.json().map_err(|e| {
            let message = format!("unreadable identity response: {}", e);
            match flow {
                Flow::Login => AuthError::ApiError {
                    status: response.status,
                    message,
                },
                Flow::Refresh => AuthError::RefreshFailed { message },
            }
        })?;

        if let Some(challenge) = parsed.challenge_name {
            warn!(challenge = %challenge, "Identity service requested an interactive challenge");
            return Err(AuthError::ChallengeRequired { challenge });
        }

        let result = parsed.authentication_result.ok_or_else(|| {
            let message = "identity response carried no tokens".to_string();
            match flow {
                Flow::Login => AuthError::ApiError {
                    status: response.status,
                    message,
                },
                Flow::Refresh => AuthError::RefreshFailed { message },
            }
        })?;

        Ok(TokenSet {
            id_token: result.id_token,
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expires_in: result.expires_in,
        })
    }

    fn classify_failure(flow: Flow, response: &Response) -> AuthError {
        let status = response.status;
        let error: Option<ServiceError> = response.json().ok();

        let rejected = error
            .as_ref()
            .map(|e| REJECTION_TYPES.contains(&e.short_type()))
            .unwrap_or(false);
        let message = error
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| response.text_lossy());

        match (flow, rejected) {
            (Flow::Login, true) => AuthError::AuthenticationFailed { message },
            (Flow::Refresh, true) => AuthError::RefreshTokenInvalid { message },
            (Flow::Login, false) => AuthError::ApiError { status, message },
            (Flow::Refresh, false) => AuthError::RefreshFailed {
                message: format!("HTTP {}: {}", status, message),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for IdentityApiClient {
    async fn login(&self, username: &str, password: &str) -> Result<TokenSet, AuthError> {
        self.initiate_auth(
            Flow::Login,
            serde_json::json!({ "USERNAME": username, "PASSWORD": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.initiate_auth(
            Flow::Refresh,
            serde_json::json!({ "REFRESH_TOKEN": refresh_token }),
        )
        .await
    }
}
