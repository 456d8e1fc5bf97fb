//! Session credentials and the upstream authentication envelope.

use serde::{Deserialize, Serialize};

use crate::GatewayError;

/// A persisted cloud session: access token, refresh token and operator id.
///
/// `access_token` may be empty right after a refresh-token-only override;
/// the first authorized request then fails with 401 and triggers a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "accessToken", default)]
    pub access_token: String,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: String,
    #[serde(rename = "operatorID", default)]
    pub operator_id: i64,
}

impl Credentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        operator_id: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            operator_id,
        }
    }

    /// Credentials carrying only a refresh token, as supplied by the operator.
    pub fn from_refresh_token(refresh_token: impl Into<String>, operator_id: i64) -> Self {
        Self::new(String::new(), refresh_token, operator_id)
    }

    /// Return `true` if a session refresh can be attempted with these credentials.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty() && self.operator_id != 0
    }
}

/// JSON body returned by the upstream login and session-refresh endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    #[serde(default)]
    pub operator_id: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

impl TryFrom<AuthenticationResponse> for Credentials {
    type Error = GatewayError;

    fn try_from(resp: AuthenticationResponse) -> Result<Self, Self::Error> {
        if resp.access_token.is_empty() {
            return Err(GatewayError::Upstream {
                status: 200,
                body: "missing accessToken in authentication response".into(),
            });
        }
        if resp.refresh_token.is_empty() {
            return Err(GatewayError::Upstream {
                status: 200,
                body: "missing refreshToken in authentication response".into(),
            });
        }
        Ok(Self::new(
            resp.access_token,
            resp.refresh_token,
            resp.operator_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_file_format() {
        let c = Credentials::new("at", "rt", 42);
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(
            v,
            json!({"accessToken": "at", "refreshToken": "rt", "operatorID": 42})
        );
    }

    #[test]
    fn test_credentials_missing_fields_default() {
        let c: Credentials = serde_json::from_str(r#"{"refreshToken":"rt"}"#).unwrap();
        assert!(c.access_token.is_empty());
        assert_eq!(c.operator_id, 0);
        assert!(!c.can_refresh());
    }

    #[test]
    fn test_from_refresh_token() {
        let c = Credentials::from_refresh_token("rt", 7);
        assert!(c.access_token.is_empty());
        assert!(c.can_refresh());
    }

    #[test]
    fn test_auth_response_conversion() {
        let resp: AuthenticationResponse = serde_json::from_value(json!({
            "operatorId": 2,
            "tokenType": "Bearer",
            "accessToken": "new-at",
            "expiresIn": 3600,
            "refreshToken": "new-rt",
            "refreshExpiresIn": 86400
        }))
        .unwrap();
        let c = Credentials::try_from(resp).unwrap();
        assert_eq!(c, Credentials::new("new-at", "new-rt", 2));
    }

    #[test]
    fn test_auth_response_without_access_token_is_rejected() {
        let resp: AuthenticationResponse =
            serde_json::from_value(json!({"operatorId": 2, "refreshToken": "rt"})).unwrap();
        assert!(Credentials::try_from(resp).is_err());
    }
}
