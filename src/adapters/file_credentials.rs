//! File-based credential store.
//!
//! The triple is written to `~/.hublink/credentials.json` as a
//! [`StoredCredentials`] blob.

use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::auth::{CredentialTriple, StoredCredentials};
use crate::traits::{CredentialStore, CredentialsError};

const CREDENTIALS_DIR: &str = ".hublink";
const CREDENTIALS_FILE: &str = "credentials.json";

/// [`CredentialStore`] persisting to a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store at the default location under the home directory.
    pub fn new() -> Result<Self, CredentialsError> {
        Self::default_path()
            .map(|path| Self { path })
            .ok_or_else(|| CredentialsError::Io("Failed to determine home directory".to_string()))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CREDENTIALS_DIR).join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<Option<CredentialTriple>, CredentialsError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path).map_err(|e| CredentialsError::LoadFailed(e.to_string()))?;
        let stored: StoredCredentials = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| CredentialsError::Serialization(e.to_string()))?;
        stored.into_triple()
    }

    fn write(path: &Path, stored: &StoredCredentials) -> Result<(), CredentialsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CredentialsError::Io(e.to_string()))?;
        }

        // Sibling temp file, then rename over the target.
        let tmp = path.with_extension("json.tmp");
        let file = File::create(&tmp).map_err(|e| CredentialsError::SaveFailed(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, stored)
            .map_err(|e| CredentialsError::Serialization(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| CredentialsError::SaveFailed(e.to_string()))?;
        drop(writer);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&tmp, path).map_err(|e| CredentialsError::SaveFailed(e.to_string()))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<CredentialTriple>, CredentialsError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::read(&path))
            .await
            .map_err(|e| CredentialsError::LoadFailed(e.to_string()))?
    }

    async fn save(&self, creds: &CredentialTriple) -> Result<(), CredentialsError> {
        if let Some(part) = creds.missing_part() {
            return Err(CredentialsError::Incomplete(format!("{} is empty", part)));
        }
        let stored = StoredCredentials::from_triple(creds);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::write(&path, &stored))
            .await
            .map_err(|e| CredentialsError::SaveFailed(e.to_string()))??;
        debug!(path = %self.path.display(), "Saved credentials");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialsError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CredentialsError::ClearFailed(e.to_string())),
        }
    }
}
