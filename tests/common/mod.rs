//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hublink::adapters::mock::{InMemoryCredentials, MockHttpClient};
use hublink::auth::{AuthSessionManager, CredentialTriple, IdentityApiClient};
use hublink::config::{HubConfig, RetryConfig};
use hublink::error::{HubError, HubResult, NetworkError};
use hublink::models::{DataUpdate, UpdateCallback};
use hublink::polling::ListingFetcher;

pub const IDENTITY_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
pub const MOCK_IDENTITY_URL: &str = "https://identity.test/";
pub const MOCK_API_URL: &str = "https://api.test/graphql";
pub const MOCK_REALTIME_URL: &str = "wss://realtime.test/graphql";

/// Unsigned JWT whose `exp` claim is `exp`.
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

/// Identity token valid for another hour.
pub fn fresh_jwt() -> String {
    jwt_with_exp(chrono::Utc::now().timestamp() + 3600)
}

pub fn fresh_triple() -> CredentialTriple {
    CredentialTriple::new(fresh_jwt(), "access-1", "refresh-1")
}

/// Identity token that expired ten seconds ago.
pub fn expired_triple() -> CredentialTriple {
    CredentialTriple::new(
        jwt_with_exp(chrono::Utc::now().timestamp() - 10),
        "access-1",
        "refresh-1",
    )
}

/// `InitiateAuth` success body.
pub fn token_response(id_token: &str, access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut result = json!({
        "IdToken": id_token,
        "AccessToken": access_token,
        "ExpiresIn": 3600,
        "TokenType": "Bearer",
    });
    if let Some(refresh) = refresh_token {
        result["RefreshToken"] = json!(refresh);
    }
    json!({ "AuthenticationResult": result })
}

pub fn rejection_response(message: &str) -> Value {
    json!({ "__type": "NotAuthorizedException", "message": message })
}

/// Retry policy with short delays for wall-clock tests.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
    }
}

pub fn test_config(api_url: &str, identity_url: &str) -> HubConfig {
    HubConfig::default()
        .with_api_url(api_url)
        .with_realtime_url(MOCK_REALTIME_URL)
        .with_identity_url(identity_url)
        .with_client_id("test-client")
        .with_retry(fast_retry(3))
}

/// Session over a mock identity endpoint, signed in with `triple`.
pub async fn mock_session(http: Arc<MockHttpClient>, triple: Option<CredentialTriple>) -> AuthSessionManager {
    let identity = Arc::new(IdentityApiClient::new(http, MOCK_IDENTITY_URL, "test-client"));
    let store = match triple {
        Some(triple) => InMemoryCredentials::with_credentials(triple),
        None => InMemoryCredentials::new(),
    };
    let session = AuthSessionManager::new(identity, Arc::new(store), Duration::from_secs(300));
    session.restore().await;
    session
}

/// Callback recording every update it receives.
pub fn recording_callback() -> (UpdateCallback, Arc<Mutex<Vec<DataUpdate>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let callback: UpdateCallback = Arc::new(move |update: DataUpdate| {
        sink.lock().unwrap().push(update);
    });
    (callback, received)
}

/// Let spawned tasks run without advancing paused time past any timer.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Fetcher returning a fixed listing and counting its calls.
pub struct CountingFetcher {
    items: Vec<Value>,
    calls: AtomicUsize,
    delay: Duration,
    pub fail: AtomicBool,
}

impl CountingFetcher {
    pub fn new(items: Vec<Value>) -> Arc<Self> {
        Self::slow(items, Duration::ZERO)
    }

    pub fn slow(items: Vec<Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            items,
            calls: AtomicUsize::new(0),
            delay,
            fail: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingFetcher for CountingFetcher {
    async fn fetch_listing(&self) -> HubResult<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HubError::Network(NetworkError::HttpStatus {
                status: 503,
                message: "unavailable".to_string(),
            }));
        }
        Ok(self.items.clone())
    }
}
