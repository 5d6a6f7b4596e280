//! Source of the shared device listing.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{HubError, HubResult, NetworkError};
use crate::request::ResilientRequestClient;

/// Fetches the list every registered device is demultiplexed from.
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    async fn fetch_listing(&self) -> HubResult<Vec<Value>>;
}

/// Runs a listing query and extracts the item array at a JSON pointer.
pub struct GraphqlListingFetcher {
    client: ResilientRequestClient,
    query: String,
    variables: Value,
    pointer: String,
}

impl GraphqlListingFetcher {
    pub fn new(client: ResilientRequestClient, query: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            client,
            query: query.into(),
            variables: Value::Null,
            pointer: pointer.into(),
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    fn extract(&self, data: Value) -> HubResult<Vec<Value>> {
        match data.pointer(&self.pointer) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::Null) | None => {
                debug!(pointer = %self.pointer, "Listing response has no items");
                Ok(Vec::new())
            }
            Some(other) => Err(HubError::Network(NetworkError::InvalidResponse {
                message: format!(
                    "expected an array at '{}', found {}",
                    self.pointer,
                    json_kind(other)
                ),
            })),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl ListingFetcher for GraphqlListingFetcher {
    async fn fetch_listing(&self) -> HubResult<Vec<Value>> {
        let data = self.client.query(&self.query, self.variables.clone()).await?;
        self.extract(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{InMemoryCredentials, MockHttpClient};
    use crate::auth::credentials::tests::jwt_with_exp;
    use crate::auth::{AuthSessionManager, CredentialTriple};
    use crate::config::{RetryConfig, DEFAULT_LISTING_POINTER, DEFAULT_LISTING_QUERY};
    use crate::traits::{IdentityProvider, TokenSet};
    use crate::error::AuthError;
    use std::sync::Arc;
    use std::time::Duration;

    const API: &str = "https://api.example.com/graphql";

    struct NoRefresh;

    #[async_trait]
    impl IdentityProvider for NoRefresh {
        async fn login(&self, _: &str, _: &str) -> Result<TokenSet, AuthError> {
            Err(AuthError::NotAuthenticated)
        }
        async fn refresh(&self, _: &str) -> Result<TokenSet, AuthError> {
            Err(AuthError::NotAuthenticated)
        }
    }

    async fn fetcher(http: Arc<MockHttpClient>) -> GraphqlListingFetcher {
        let session = AuthSessionManager::new(
            Arc::new(NoRefresh),
            Arc::new(InMemoryCredentials::new()),
            Duration::from_secs(300),
        );
        let exp = chrono::Utc::now().timestamp() + 3600;
        session
            .set_credentials(CredentialTriple::new(jwt_with_exp(exp), "acc", "ref"))
            .await
            .unwrap();
        let client = ResilientRequestClient::new(http, session, API, RetryConfig::default());
        GraphqlListingFetcher::new(client, DEFAULT_LISTING_QUERY, DEFAULT_LISTING_POINTER)
    }

    #[tokio::test]
    async fn test_extracts_items() {
        let http = Arc::new(MockHttpClient::new());
        http.push_json(
            API,
            200,
            r#"{"data":{"listDevices":{"items":[{"id":"a"},{"id":"b"}]}}}"#,
        );

        let items = fetcher(http.clone()).await.fetch_listing().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["id"], "b");

        let body: Value = serde_json::from_str(&http.requests()[0].body).unwrap();
        assert_eq!(body["query"], DEFAULT_LISTING_QUERY);
    }

    #[tokio::test]
    async fn test_missing_list_is_empty() {
        let http = Arc::new(MockHttpClient::new());
        http.push_json(API, 200, r#"{"data":{"listDevices":null}}"#);

        let items = fetcher(http).await.fetch_listing().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_shape_is_invalid_response() {
        let http = Arc::new(MockHttpClient::new());
        http.push_json(API, 200, r#"{"data":{"listDevices":{"items":"nope"}}}"#);

        let err = fetcher(http).await.fetch_listing().await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Network(NetworkError::InvalidResponse { .. })
        ));
    }
}
