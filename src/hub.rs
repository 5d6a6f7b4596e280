//! Top-level session owner.
//!
//! [`HubSession`] wires the credential store, session manager, request
//! client, realtime manager and polling coordinator together, and tears down
//! everything that depends on credentials when the session is invalidated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::adapters::{FileCredentialStore, ReqwestHttpClient, TungsteniteTransport};
use crate::auth::{AuthSessionManager, IdentityApiClient, ObserverId, SessionEvent};
use crate::config::HubConfig;
use crate::error::{HubError, HubResult, TransportError};
use crate::models::UpdateCallback;
use crate::polling::{GraphqlListingFetcher, ListingFetcher, PollingCoordinator};
use crate::realtime::{ConnectOptions, RealtimeConnectionManager, SubscriptionState};
use crate::request::ResilientRequestClient;
use crate::traits::{CredentialStore, HttpClient, IdentityProvider, RealtimeTransport};
use crate::util::lock;

/// Collaborators a [`HubSession`] is built from.
pub struct HubComponents {
    pub http: Arc<dyn HttpClient>,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn CredentialStore>,
    pub transport: Arc<dyn RealtimeTransport>,
    /// Defaults to the configured listing query run through the request client.
    pub fetcher: Option<Arc<dyn ListingFetcher>>,
}

impl HubComponents {
    /// Production adapters for `config`.
    pub fn production(config: &HubConfig) -> HubResult<Self> {
        let http = ReqwestHttpClient::with_timeout(config.request_timeout).map_err(|e| {
            HubError::Configuration {
                message: format!("failed to build HTTP client: {}", e),
            }
        })?;
        let http: Arc<dyn HttpClient> = Arc::new(http);
        let store = match &config.credentials_path {
            Some(path) => FileCredentialStore::with_path(path.clone()),
            None => FileCredentialStore::new()?,
        };
        Ok(Self {
            identity: Arc::new(IdentityApiClient::new(
                http.clone(),
                config.identity_url.clone(),
                config.client_id.clone(),
            )),
            http,
            store: Arc::new(store),
            transport: Arc::new(TungsteniteTransport::new()),
            fetcher: None,
        })
    }
}

pub struct HubSession {
    config: HubConfig,
    session: AuthSessionManager,
    requests: ResilientRequestClient,
    realtime: RealtimeConnectionManager,
    polling: PollingCoordinator,
    observer: Mutex<Option<ObserverId>>,
    shut_down: AtomicBool,
}

impl HubSession {
    pub fn new(config: HubConfig, components: HubComponents) -> Self {
        let session = AuthSessionManager::new(
            components.identity,
            components.store,
            config.validity_buffer,
        );
        let requests = ResilientRequestClient::new(
            components.http,
            session.clone(),
            config.api_url.clone(),
            config.retry.clone(),
        );
        let realtime = RealtimeConnectionManager::new(components.transport, session.clone(), &config);
        let fetcher: Arc<dyn ListingFetcher> = match components.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(GraphqlListingFetcher::new(
                requests.clone(),
                config.listing_query.clone(),
                config.listing_pointer.clone(),
            )),
        };
        let polling = PollingCoordinator::new(fetcher, config.polling.clone());

        // Polling waits for a session; restore or sign-in resumes it.
        polling.pause();

        let observer = {
            let realtime = realtime.clone();
            let polling = polling.clone();
            session.subscribe(Arc::new(move |event: &SessionEvent| match event {
                SessionEvent::SignedIn => polling.resume(),
                SessionEvent::Invalidated { reason } => {
                    warn!(reason = %reason, "Session invalidated, closing connections and pausing polls");
                    polling.pause();
                    let realtime = realtime.clone();
                    tokio::spawn(async move { realtime.close_all().await });
                }
                SessionEvent::SignedOut => {
                    polling.pause();
                    let realtime = realtime.clone();
                    tokio::spawn(async move { realtime.close_all().await });
                }
                SessionEvent::Refreshed => {}
            }))
        };

        if config.sign_out_when_idle {
            let session = session.clone();
            let realtime = realtime.clone();
            polling.set_on_empty(Arc::new(move || {
                if !realtime.device_ids().is_empty() {
                    debug!("No devices left polling, realtime subscriptions keep the session");
                    return;
                }
                info!("No devices left polling, signing out");
                let session = session.clone();
                tokio::spawn(async move { session.sign_out().await });
            }));
        }

        Self {
            config,
            session,
            requests,
            realtime,
            polling,
            observer: Mutex::new(Some(observer)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Validate `config` and build a session over the production adapters.
    pub fn from_config(config: HubConfig) -> HubResult<Self> {
        config.validate()?;
        let components = HubComponents::production(&config)?;
        Ok(Self::new(config, components))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn session(&self) -> &AuthSessionManager {
        &self.session
    }

    pub fn requests(&self) -> &ResilientRequestClient {
        &self.requests
    }

    pub fn realtime(&self) -> &RealtimeConnectionManager {
        &self.realtime
    }

    pub fn polling(&self) -> &PollingCoordinator {
        &self.polling
    }

    /// Load persisted credentials. Returns whether a session exists.
    pub async fn restore(&self) -> bool {
        let restored = self.session.restore().await;
        if restored {
            self.polling.resume();
        }
        restored
    }

    /// Sign in. Polling resumes for the kept registrations.
    pub async fn login(&self, username: &str, password: &str) -> HubResult<()> {
        self.session.login(username, password).await?;
        Ok(())
    }

    /// Close every connection, pause polling and clear the session.
    pub async fn logout(&self) {
        self.polling.pause();
        self.realtime.close_all().await;
        self.session.sign_out().await;
    }

    /// Subscribe `device_id` to realtime updates.
    pub async fn connect_device(
        &self,
        device_id: &str,
        on_update: UpdateCallback,
    ) -> Result<SubscriptionState, TransportError> {
        let state = self
            .realtime
            .connect(device_id, ConnectOptions::new().with_callback(on_update))
            .await?;
        let current = *state.borrow();
        Ok(current)
    }

    /// Close the realtime subscription of `device_id`. With idle sign-out
    /// enabled the session ends once no consumer is left.
    pub async fn disconnect_device(&self, device_id: &str) {
        self.realtime.close(device_id).await;
        if self.config.sign_out_when_idle
            && self.session.is_authenticated()
            && self.polling.registered_count() == 0
            && self.realtime.device_ids().is_empty()
        {
            info!("No consumers left, signing out");
            self.session.sign_out().await;
        }
    }

    /// Add `device_id` to the shared poll. Without a session the entry is kept
    /// and polled once the session is back.
    pub fn register_poller(&self, device_id: &str, correlation_key: &str, on_update: UpdateCallback) -> bool {
        self.polling.register(device_id, correlation_key, on_update)
    }

    pub fn unregister_poller(&self, device_id: &str) -> bool {
        self.polling.unregister(device_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Tear everything down. Credentials stay persisted. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down hub session");
        if let Some(id) = lock(&self.observer).take() {
            self.session.unsubscribe(id);
        }
        self.session.clear_observers();
        self.polling.destroy();
        self.realtime.close_all().await;
    }
}
