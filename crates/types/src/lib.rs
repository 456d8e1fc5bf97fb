//! Core types and traits for the domru-gateway workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! gateway: the persisted session [`Credentials`], the unified
//! [`GatewayError`], and the async traits each layer implements.

pub mod credentials;
pub mod error;
pub mod redact;
pub mod traits;

pub use credentials::{AuthenticationResponse, Credentials};
pub use error::{GatewayError, Result};
pub use redact::redact;
pub use traits::{CredentialsStore, TokenProvider};
