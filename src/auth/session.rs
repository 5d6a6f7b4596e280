//! Session manager owning the credential triple.
//!
//! All reads go through [`AuthSessionManager::get_headers`], which refreshes
//! a stale session first. At most one refresh is in flight at any time:
//! concurrent callers await the same shared future and observe the same
//! outcome. A failed refresh always clears the session.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credentials::{AuthHeaders, CredentialTriple};
use crate::error::AuthError;
use crate::traits::{CredentialStore, CredentialsError, IdentityProvider};
use crate::util::{lock, read, write};

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    SignedOut,
    /// The session was cleared because it could not be renewed.
    Invalidated { reason: String },
}

pub type SessionObserver = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by [`AuthSessionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type RefreshResult = Result<CredentialTriple, AuthError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct SessionInner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    validity_buffer: Duration,
    credentials: RwLock<Option<CredentialTriple>>,
    /// Bumped whenever the session is replaced or cleared; a refresh started
    /// under an older generation must not write its result back.
    generation: AtomicU64,
    pending_refresh: Mutex<Option<PendingRefresh>>,
    observers: Mutex<Vec<(ObserverId, SessionObserver)>>,
    next_observer_id: AtomicU64,
    upstream_refreshes: AtomicU64,
}

/// Owner of the credential triple.
#[derive(Clone)]
pub struct AuthSessionManager {
    inner: Arc<SessionInner>,
}

impl AuthSessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
        validity_buffer: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                provider,
                store,
                validity_buffer,
                credentials: RwLock::new(None),
                generation: AtomicU64::new(0),
                pending_refresh: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(1),
                upstream_refreshes: AtomicU64::new(0),
            }),
        }
    }

    /// Load a previously persisted triple. Returns whether a session exists.
    ///
    /// A partial or unreadable blob counts as "no session" and is cleared.
    pub async fn restore(&self) -> bool {
        match self.inner.store.load().await {
            Ok(Some(triple)) => {
                if let Err(e) = triple.validate() {
                    warn!(error = %e, "Stored credentials are invalid, clearing");
                    self.clear_store().await;
                    return false;
                }
                self.install(triple);
                debug!("Restored session from credential store");
                true
            }
            Ok(None) => false,
            Err(e @ CredentialsError::Incomplete(_)) | Err(e @ CredentialsError::Serialization(_)) => {
                warn!(error = %e, "Stored credentials are unusable, clearing");
                self.clear_store().await;
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored credentials");
                false
            }
        }
    }

    /// Authenticate with a username and password.
    ///
    /// Challenges are fatal here and surface as [`AuthError::ChallengeRequired`].
    pub async fn login(&self, username: &str, password: &str) -> Result<CredentialTriple, AuthError> {
        let tokens = self.inner.provider.login(username, password).await?;
        let triple = CredentialTriple::from_login(tokens)?;

        self.install(triple.clone());
        self.persist(&triple).await;
        info!("Signed in");
        self.emit(&SessionEvent::SignedIn);
        Ok(triple)
    }

    /// Adopt a triple obtained elsewhere (for example from hub settings).
    pub async fn set_credentials(&self, triple: CredentialTriple) -> Result<(), AuthError> {
        triple.validate()?;
        self.install(triple.clone());
        self.persist(&triple).await;
        self.emit(&SessionEvent::SignedIn);
        Ok(())
    }

    /// True iff an identity token is present, decodes, and expires after
    /// now plus the validity buffer. Evaluated against the clock on every call.
    pub fn is_valid(&self) -> bool {
        read(&self.inner.credentials)
            .as_ref()
            .map(|c| c.is_valid_at(chrono::Utc::now(), self.inner.validity_buffer))
            .unwrap_or(false)
    }

    /// Whether a triple is held, valid or not.
    pub fn is_authenticated(&self) -> bool {
        read(&self.inner.credentials).is_some()
    }

    pub fn credentials(&self) -> Option<CredentialTriple> {
        read(&self.inner.credentials).clone()
    }

    /// Number of refresh calls actually sent upstream.
    pub fn upstream_refreshes(&self) -> u64 {
        self.inner.upstream_refreshes.load(Ordering::SeqCst)
    }

    /// Refresh the session, joining a refresh that is already in flight.
    pub async fn refresh(&self) -> Result<CredentialTriple, AuthError> {
        let pending = {
            let mut slot = lock(&self.inner.pending_refresh);
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight refresh");
                    pending.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move {
                        let result = run_refresh(&inner).await;
                        *lock(&inner.pending_refresh) = None;
                        result
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(AuthError::RefreshFailed {
                                message: format!("refresh task failed: {}", e),
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        pending.await
    }

    /// Refresh regardless of local validity; used when the API rejected
    /// headers that still looked valid.
    pub async fn force_refresh(&self) -> Result<AuthHeaders, AuthError> {
        self.refresh().await.map(|triple| triple.headers())
    }

    /// Headers for an outbound call, refreshing a stale session first.
    pub async fn get_headers(&self) -> Result<AuthHeaders, AuthError> {
        let current = read(&self.inner.credentials).clone();
        match current {
            None => Err(AuthError::NotAuthenticated),
            Some(triple) if triple.is_valid_at(chrono::Utc::now(), self.inner.validity_buffer) => {
                Ok(triple.headers())
            }
            Some(_) => {
                debug!("Session stale, refreshing before use");
                self.refresh().await.map(|triple| triple.headers())
            }
        }
    }

    /// Clear the session in memory and in the store.
    pub async fn sign_out(&self) {
        let had_session = {
            let mut creds = write(&self.inner.credentials);
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            creds.take().is_some()
        };
        self.clear_store().await;
        if had_session {
            info!("Signed out");
            self.emit(&SessionEvent::SignedOut);
        }
    }

    pub fn subscribe(&self, observer: SessionObserver) -> ObserverId {
        let id = ObserverId(self.inner.next_observer_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.inner.observers).push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        lock(&self.inner.observers).retain(|(observer_id, _)| *observer_id != id);
    }

    /// Drop every observer. Observers often capture owners of this manager.
    pub fn clear_observers(&self) {
        lock(&self.inner.observers).clear();
    }

    fn install(&self, triple: CredentialTriple) {
        let mut creds = write(&self.inner.credentials);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *creds = Some(triple);
    }

    async fn persist(&self, triple: &CredentialTriple) {
        persist(&self.inner, triple).await;
    }

    async fn clear_store(&self) {
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear credential store");
        }
    }

    fn emit(&self, event: &SessionEvent) {
        emit(&self.inner, event);
    }
}

async fn run_refresh(inner: &Arc<SessionInner>) -> RefreshResult {
    let (current, generation) = {
        let creds = read(&inner.credentials);
        (creds.clone(), inner.generation.load(Ordering::SeqCst))
    };

    let Some(current) = current else {
        debug!("Refresh requested without a session");
        return Err(AuthError::RefreshTokenMissing);
    };

    inner.upstream_refreshes.fetch_add(1, Ordering::SeqCst);
    debug!("Refreshing session");

    let outcome = match inner.provider.refresh(&current.refresh_token).await {
        Ok(tokens) => current.refreshed(tokens).map_err(|e| AuthError::RefreshFailed {
            message: e.to_string(),
        }),
        Err(e) if e.is_token_error() => Err(e),
        Err(e) => Err(AuthError::RefreshFailed {
            message: e.to_string(),
        }),
    };

    match outcome {
        Ok(triple) => {
            {
                let mut creds = write(&inner.credentials);
                if inner.generation.load(Ordering::SeqCst) != generation {
                    debug!("Session changed during refresh, discarding result");
                    return Err(AuthError::NotAuthenticated);
                }
                inner.generation.fetch_add(1, Ordering::SeqCst);
                *creds = Some(triple.clone());
            }
            persist(inner, &triple).await;
            info!("Session refreshed");
            emit(inner, &SessionEvent::Refreshed);
            Ok(triple)
        }
        Err(e) => {
            warn!(error = %e, "Session refresh failed");
            invalidate(inner, generation, &e.to_string()).await;
            Err(e)
        }
    }
}

/// Clear the session if it is still the one the failed refresh started from.
///
/// `Invalidated` is only emitted when a triple was actually dropped.
async fn invalidate(inner: &Arc<SessionInner>, generation: u64, reason: &str) {
    {
        let mut creds = write(&inner.credentials);
        if inner.generation.load(Ordering::SeqCst) != generation || creds.is_none() {
            return;
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);
        *creds = None;
    }
    if let Err(e) = inner.store.clear().await {
        warn!(error = %e, "Failed to clear credential store");
    }
    emit(
        inner,
        &SessionEvent::Invalidated {
            reason: reason.to_string(),
        },
    );
}

async fn persist(inner: &Arc<SessionInner>, triple: &CredentialTriple) {
    if let Err(e) = inner.store.save(triple).await {
        warn!(error = %e, "Failed to persist credentials");
    }
}

fn emit(inner: &Arc<SessionInner>, event: &SessionEvent) {
    let observers: Vec<SessionObserver> = lock(&inner.observers)
        .iter()
        .map(|(_, observer)| observer.clone())
        .collect();
    for observer in observers {
        observer(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::InMemoryCredentials;
    use crate::auth::credentials::tests::jwt_with_exp;
    use crate::traits::TokenSet;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Identity provider answering from a script, with an optional delay.
    struct ScriptedProvider {
        refresh_result: Mutex<RefreshResult>,
        delay: Duration,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn ok(id_token: String) -> Arc<Self> {
            Arc::new(Self {
                refresh_result: Mutex::new(Ok(CredentialTriple::new(id_token, "access-2", "unused"))),
                delay: Duration::from_millis(50),
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: AuthError) -> Arc<Self> {
            Arc::new(Self {
                refresh_result: Mutex::new(Err(err)),
                delay: Duration::ZERO,
                refresh_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn login(&self, _username: &str, _password: &str) -> Result<TokenSet, AuthError> {
            Ok(TokenSet {
                id_token: jwt_with_exp(chrono::Utc::now().timestamp() + 3600),
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_in: Some(3600),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            lock(&self.refresh_result).clone().map(|t| TokenSet {
                id_token: t.id_token,
                access_token: t.access_token,
                refresh_token: None,
                expires_in: Some(3600),
            })
        }
    }

    fn fresh_token() -> String {
        jwt_with_exp(chrono::Utc::now().timestamp() + 3600)
    }

    fn stale_triple() -> CredentialTriple {
        CredentialTriple::new(jwt_with_exp(chrono::Utc::now().timestamp() - 10), "access-1", "refresh-1")
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_upstream_call() {
        let provider = ScriptedProvider::ok(fresh_token());
        let store = Arc::new(InMemoryCredentials::with_credentials(stale_triple()));
        let session = AuthSessionManager::new(provider.clone(), store, Duration::from_secs(300));
        assert!(session.restore().await);

        let results = futures::future::join_all((0..8).map(|_| {
            let session = session.clone();
            async move { session.refresh().await }
        }))
        .await;

        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
        let first = results[0].clone().unwrap();
        for result in results {
            assert_eq!(result.unwrap(), first);
        }
        assert_eq!(first.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn test_stale_session_refreshes_on_get_headers() {
        let provider = ScriptedProvider::ok(fresh_token());
        let store = Arc::new(InMemoryCredentials::with_credentials(stale_triple()));
        let session = AuthSessionManager::new(provider, store.clone(), Duration::from_secs(300));
        session.restore().await;

        assert!(!session.is_valid());
        let headers = session.get_headers().await.unwrap();
        assert_eq!(headers.access_token, "access-2");
        assert!(session.is_valid());
        assert_eq!(store.get_credentials().map(|c| c.access_token), Some("access-2".to_string()));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session() {
        let provider = ScriptedProvider::failing(AuthError::RefreshTokenInvalid {
            message: "revoked".to_string(),
        });
        let store = Arc::new(InMemoryCredentials::with_credentials(stale_triple()));
        let session = AuthSessionManager::new(provider, store.clone(), Duration::from_secs(300));
        session.restore().await;

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe(Arc::new(move |e: &SessionEvent| lock(&sink).push(e.clone())));

        let err = session.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshTokenInvalid { .. }));
        assert!(!session.is_authenticated());
        assert_eq!(store.get_credentials(), None);
        assert!(matches!(lock(&events).as_slice(), [SessionEvent::Invalidated { .. }]));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_as_refresh_failure() {
        let provider = ScriptedProvider::failing(AuthError::ApiError {
            status: 0,
            message: "unreachable".to_string(),
        });
        let store = Arc::new(InMemoryCredentials::with_credentials(stale_triple()));
        let session = AuthSessionManager::new(provider, store, Duration::from_secs(300));
        session.restore().await;

        let err = session.refresh().await.unwrap_err();
        assert!(err.is_token_error());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let provider = ScriptedProvider::ok(fresh_token());
        let session = AuthSessionManager::new(
            provider.clone(),
            Arc::new(InMemoryCredentials::new()),
            Duration::from_secs(300),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe(Arc::new(move |e: &SessionEvent| lock(&sink).push(e.clone())));

        assert_eq!(session.refresh().await.unwrap_err(), AuthError::RefreshTokenMissing);
        assert_eq!(session.force_refresh().await.unwrap_err(), AuthError::RefreshTokenMissing);
        assert_eq!(session.get_headers().await.unwrap_err(), AuthError::NotAuthenticated);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(lock(&events).is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_during_refresh_discards_result() {
        let provider = ScriptedProvider::ok(fresh_token());
        let store = Arc::new(InMemoryCredentials::with_credentials(stale_triple()));
        let session = AuthSessionManager::new(provider, store.clone(), Duration::from_secs(300));
        session.restore().await;

        let refreshing = {
            let session = session.clone();
            tokio::spawn(async move { session.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.sign_out().await;

        assert_eq!(refreshing.await.unwrap().unwrap_err(), AuthError::NotAuthenticated);
        assert!(!session.is_authenticated());
        assert_eq!(store.get_credentials(), None);
    }

    #[tokio::test]
    async fn test_login_persists_and_notifies() {
        let provider = ScriptedProvider::ok(fresh_token());
        let store = Arc::new(InMemoryCredentials::new());
        let session = AuthSessionManager::new(provider, store.clone(), Duration::from_secs(300));

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = session.subscribe(Arc::new(move |e: &SessionEvent| {
            if *e == SessionEvent::SignedIn {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.login("user", "pw").await.unwrap();
        assert!(session.is_valid());
        assert_eq!(store.save_count(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        session.unsubscribe(id);
        session.login("user", "pw").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_clears_partial_blob() {
        let store = Arc::new(InMemoryCredentials::with_credentials(CredentialTriple::new("a", "", "c")));
        let session = AuthSessionManager::new(
            ScriptedProvider::ok(fresh_token()),
            store.clone(),
            Duration::from_secs(300),
        );

        assert!(!session.restore().await);
        assert!(!session.is_authenticated());
        assert_eq!(store.get_credentials(), None);
    }
}
