//! API error type that maps [`GatewayError`] variants to HTTP status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domru_types::GatewayError;
use serde_json::json;

/// Wrapper around [`GatewayError`] that implements [`IntoResponse`].
pub struct ApiError(pub GatewayError);

impl ApiError {
    /// Returns `(status, error_type, error_code)` for the wrapped error.
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match &self.0 {
            GatewayError::NoCredentials(_) | GatewayError::LoadFailed(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "authentication_error",
                "credentials_unavailable",
            ),
            GatewayError::AuthExpired(_) => (
                StatusCode::BAD_GATEWAY,
                "authentication_error",
                "session_expired",
            ),
            GatewayError::Http(_) | GatewayError::Upstream { .. } => {
                (StatusCode::BAD_GATEWAY, "server_error", "upstream_error")
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, error_code) = self.classify();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, status = status.as_u16(), "proxy request failed");
        }
        (
            status,
            Json(json!({
                "error": {
                    "message": self.0.to_string(),
                    "type": error_type,
                    "code": error_code,
                }
            })),
        )
            .into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}
