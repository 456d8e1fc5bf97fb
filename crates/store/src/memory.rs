//! In-memory credentials store backed by a `Mutex`.

use async_trait::async_trait;
use domru_types::{Credentials, CredentialsStore, GatewayError, Result};
use std::sync::Mutex;

/// An in-memory [`CredentialsStore`] implementation for testing and ephemeral use.
pub struct InMemoryCredentialsStore {
    data: Mutex<Option<Credentials>>,
}

impl InMemoryCredentialsStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Mutex::new(None),
        }
    }

    /// Creates a store pre-populated with `credentials`.
    #[must_use]
    pub fn with(credentials: Credentials) -> Self {
        Self {
            data: Mutex::new(Some(credentials)),
        }
    }

    /// Returns the current record without going through the async trait.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Option<Credentials> {
        self.data.lock().unwrap().clone()
    }
}

impl Default for InMemoryCredentialsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialsStore for InMemoryCredentialsStore {
    async fn load(&self) -> Result<Credentials> {
        self.data
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GatewayError::LoadFailed("no credentials stored".into()))
    }

    async fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.data.lock().unwrap() = Some(credentials.clone());
        Ok(())
    }
}
