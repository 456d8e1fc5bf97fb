//! JSON-file credentials store.
//!
//! The record is written as `{"accessToken", "refreshToken", "operatorID"}`
//! to a sibling temporary file and renamed over the target, so a reader never
//! observes a partially written record and the session survives restarts.

use async_trait::async_trait;
use domru_types::{Credentials, CredentialsStore, GatewayError, Result};
use std::path::{Path, PathBuf};

/// A persistent [`CredentialsStore`] backed by a single JSON file.
pub struct FileCredentialsStore {
    path: PathBuf,
    /// Serializes writers so two saves never share the temporary file.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCredentialsStore {
    /// Creates a store for `path`. The file is not touched until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialsStore for FileCredentialsStore {
    async fn load(&self) -> Result<Credentials> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| GatewayError::LoadFailed(format!("{}: {e}", self.path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::LoadFailed(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        let json = serde_json::to_vec_pretty(credentials)
            .map_err(|e| GatewayError::SaveFailed(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::SaveFailed(format!("{}: {e}", parent.display())))?;
        }

        let _guard = self.write_lock.lock().await;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| GatewayError::SaveFailed(format!("{}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(GatewayError::SaveFailed(format!(
                "{}: {e}",
                self.path.display()
            )));
        }
        tracing::debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}
