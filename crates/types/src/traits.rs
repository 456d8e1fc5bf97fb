//! Async traits shared across all gateway crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `domru-types`, not on each other.

use crate::{Credentials, Result};
use async_trait::async_trait;

/// Durable persistence of the single session record.
///
/// `save` fully overwrites the stored record; it never merges fields.
/// Implementations must make each write atomic (no partially written record
/// is ever observable by `load`).
#[async_trait]
pub trait CredentialsStore: Send + Sync {
    /// Load the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::LoadFailed`](crate::GatewayError::LoadFailed)
    /// when the record is missing or unreadable.
    async fn load(&self) -> Result<Credentials>;

    /// Replace the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::SaveFailed`](crate::GatewayError::SaveFailed)
    /// when the record cannot be persisted.
    async fn save(&self, credentials: &Credentials) -> Result<()>;
}

/// Source of the current session token and the operation that renews it.
///
/// Implementations re-read the [`CredentialsStore`] on every call.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The operator id of the current session.
    async fn current_operator_id(&self) -> Result<i64>;
    /// The current access token (possibly empty).
    async fn current_token(&self) -> Result<String>;
    /// Exchange the stored refresh token for a new session and persist it.
    async fn refresh(&self) -> Result<()>;
}
