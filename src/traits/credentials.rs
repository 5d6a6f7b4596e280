//! Credential persistence boundary.

use async_trait::async_trait;

use crate::auth::CredentialTriple;

/// Credential store errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialsError {
    LoadFailed(String),
    SaveFailed(String),
    ClearFailed(String),
    /// A triple with a missing or empty part was offered or found.
    Incomplete(String),
    Io(String),
    Serialization(String),
}

impl std::fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsError::LoadFailed(msg) => write!(f, "Failed to load credentials: {}", msg),
            CredentialsError::SaveFailed(msg) => write!(f, "Failed to save credentials: {}", msg),
            CredentialsError::ClearFailed(msg) => {
                write!(f, "Failed to clear credentials: {}", msg)
            }
            CredentialsError::Incomplete(msg) => write!(f, "Incomplete credentials: {}", msg),
            CredentialsError::Io(msg) => write!(f, "IO error: {}", msg),
            CredentialsError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CredentialsError {}

/// Opaque get/set/clear storage for the credential triple.
///
/// The store never mutates what it holds. `Ok(None)` from [`load`] means
/// "no prior session" and is not an error.
///
/// [`load`]: CredentialStore::load
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<CredentialTriple>, CredentialsError>;

    /// Persist a triple. Implementations must reject incomplete triples
    /// with [`CredentialsError::Incomplete`] before writing anything.
    async fn save(&self, creds: &CredentialTriple) -> Result<(), CredentialsError>;

    async fn clear(&self) -> Result<(), CredentialsError>;
}
