//! In-memory credential store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::CredentialTriple;
use crate::traits::{CredentialStore, CredentialsError};
use crate::util::lock;

/// [`CredentialStore`] keeping the triple in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentials {
    credentials: Arc<Mutex<Option<CredentialTriple>>>,
    save_should_fail: Arc<AtomicBool>,
    load_should_fail: Arc<AtomicBool>,
    clear_should_fail: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
    clears: Arc<AtomicUsize>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(creds: CredentialTriple) -> Self {
        let store = Self::default();
        store.set_credentials(Some(creds));
        store
    }

    pub fn set_save_should_fail(&self, should_fail: bool) {
        self.save_should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn set_load_should_fail(&self, should_fail: bool) {
        self.load_should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn set_clear_should_fail(&self, should_fail: bool) {
        self.clear_should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn get_credentials(&self) -> Option<CredentialTriple> {
        lock(&self.credentials).clone()
    }

    pub fn set_credentials(&self, creds: Option<CredentialTriple>) {
        *lock(&self.credentials) = creds;
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    async fn load(&self) -> Result<Option<CredentialTriple>, CredentialsError> {
        if self.load_should_fail.load(Ordering::SeqCst) {
            return Err(CredentialsError::LoadFailed("Mock load failure".to_string()));
        }
        Ok(self.get_credentials())
    }

    async fn save(&self, creds: &CredentialTriple) -> Result<(), CredentialsError> {
        if self.save_should_fail.load(Ordering::SeqCst) {
            return Err(CredentialsError::SaveFailed("Mock save failure".to_string()));
        }
        if let Some(part) = creds.missing_part() {
            return Err(CredentialsError::Incomplete(format!("{} is empty", part)));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.set_credentials(Some(creds.clone()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialsError> {
        if self.clear_should_fail.load(Ordering::SeqCst) {
            return Err(CredentialsError::ClearFailed("Mock clear failure".to_string()));
        }
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.set_credentials(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_clear() {
        let store = InMemoryCredentials::new();
        assert_eq!(store.load().await.unwrap(), None);

        let triple = CredentialTriple::new("a", "b", "c");
        store.save(&triple).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(triple));
        assert_eq!(store.save_count(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_incomplete() {
        let store = InMemoryCredentials::new();
        let err = store
            .save(&CredentialTriple::new("a", "b", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::Incomplete(_)));
        assert_eq!(store.get_credentials(), None);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = InMemoryCredentials::new();
        store.set_save_should_fail(true);
        store.set_load_should_fail(true);
        assert!(store.save(&CredentialTriple::new("a", "b", "c")).await.is_err());
        assert!(store.load().await.is_err());
    }
}
