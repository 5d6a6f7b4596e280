//! Retrying request client.
//!
//! One call to [`ResilientRequestClient::execute`] runs an explicit bounded
//! loop:
//!
//! 1. headers come from the session manager (refreshed when stale)
//! 2. transport failures and retryable statuses (5xx, 408, 429) are retried
//!    after `base * 2^retry`
//! 3. a 401 on the first attempt forces one refresh and an immediate retry
//!    that does not use up a retry slot; any later 401 is surfaced
//! 4. errors embedded in a 2xx body are surfaced without retrying
//! 5. the surfaced error carries the endpoint and the number of attempts

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::graphql::{GraphqlRequest, GraphqlResponse};
use crate::auth::AuthSessionManager;
use crate::config::RetryConfig;
use crate::error::{classify_http_error, ErrorContext, HubError, HubResult, NetworkError};
use crate::traits::{HttpClient, Response};

/// Longest response excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Clone)]
pub struct ResilientRequestClient {
    http: Arc<dyn HttpClient>,
    session: AuthSessionManager,
    endpoint: String,
    retry: RetryConfig,
}

impl ResilientRequestClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        session: AuthSessionManager,
        endpoint: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            session,
            endpoint: endpoint.into(),
            retry,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session(&self) -> &AuthSessionManager {
        &self.session
    }

    /// Run `query` against the default endpoint and return its `data`.
    pub async fn query(&self, query: &str, variables: serde_json::Value) -> HubResult<serde_json::Value> {
        let request = GraphqlRequest::new(query).with_variables(variables);
        self.execute(&self.endpoint, &request).await
    }

    /// Send `payload` to `endpoint` and return the `data` member of the response.
    pub async fn execute(&self, endpoint: &str, payload: &GraphqlRequest) -> HubResult<serde_json::Value> {
        let body = serde_json::to_string(payload)?;
        let mut attempts: u32 = 0;
        let mut retries_used: u32 = 0;
        let mut forced_refresh = false;

        loop {
            attempts += 1;
            let context = || {
                ErrorContext::new("execute")
                    .with_endpoint(endpoint)
                    .with_attempts(attempts)
            };

            let auth = self
                .session
                .get_headers()
                .await
                .map_err(|e| HubError::from(e).with_context(context()))?;
            let mut headers = auth.as_headers();
            headers.insert("Content-Type".to_string(), "application/json".to_string());

            debug!(endpoint, attempt = attempts, "Sending request");

            let failure = match self.http.post(endpoint, &body, &headers).await {
                Err(e) => classify_http_error(&e, endpoint),
                Ok(response) if response.is_success() => {
                    return Self::parse_success(&response).map_err(|e| e.with_context(context()));
                }
                Ok(response) if response.status == 401 => {
                    if attempts == 1 && !forced_refresh {
                        forced_refresh = true;
                        info!(endpoint, "Request unauthorized, forcing credential refresh");
                        self.session
                            .force_refresh()
                            .await
                            .map_err(|e| HubError::from(e).with_context(context()))?;
                        continue;
                    }
                    return Err(HubError::Network(Self::status_error(&response)).with_context(context()));
                }
                Ok(response) => Self::status_error(&response),
            };

            if !failure.is_retryable() || retries_used >= self.retry.max_retries {
                warn!(
                    endpoint,
                    attempts,
                    error = %failure,
                    "Request failed"
                );
                return Err(HubError::Network(failure).with_context(context()));
            }

            let delay = self.retry.delay_for(retries_used);
            retries_used += 1;
            warn!(
                endpoint,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn parse_success(response: &Response) -> HubResult<serde_json::Value> {
        let mut parsed: GraphqlResponse = response.json().map_err(|e| {
            HubError::Network(NetworkError::InvalidResponse {
                message: e.to_string(),
            })
        })?;
        if let Some(errors) = parsed.take_errors() {
            return Err(HubError::Graphql(errors));
        }
        Ok(parsed.data.unwrap_or(serde_json::Value::Null))
    }

    fn status_error(response: &Response) -> NetworkError {
        let text = response.text_lossy();
        let message: String = text.chars().take(MAX_ERROR_BODY).collect();
        NetworkError::HttpStatus {
            status: response.status,
            message,
        }
    }
}
