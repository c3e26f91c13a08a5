//! OAuth credentials for the weight provider.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Tokens are treated as expired this long before their stated expiry.
const EXPIRY_MARGIN: Duration = Duration::seconds(60);

fn bearer() -> String {
    "Bearer".to_string()
}

/// An OAuth 2.0 access/refresh token pair, as stored in the secret store.
///
/// `expires_at` also accepts `expiry`, so tokens exported by other OAuth
/// tooling can be imported unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default, alias = "expiry", with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl OAuthToken {
    /// Whether the access token should be refreshed before use at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now + EXPIRY_MARGIN >= expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Serialize for the secret store.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize a secret store payload.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Body of a successful refresh at the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Omitted by some providers when the refresh token is not rotated.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "bearer")]
    pub token_type: String,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TokenResponse {
    /// Turn the response into a stored token, anchoring expiry at `issued_at`.
    ///
    /// `previous` supplies the refresh token when the response carries none.
    pub fn into_token(self, issued_at: OffsetDateTime, previous: &OAuthToken) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            token_type: self.token_type,
            expires_at: self
                .expires_in
                .map(|secs| issued_at + Duration::seconds(secs)),
            scope: self.scope.or_else(|| previous.scope.clone()),
            user_id: self.user_id.or_else(|| previous.user_id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_token_accepts_expiry_alias() {
        let token = OAuthToken::from_bytes(
            br#"{"access_token":"a","token_type":"Bearer","refresh_token":"r",
                 "expiry":"2024-05-01T10:00:00.123456+10:00"}"#,
        )
        .unwrap();
        assert_eq!(token.refresh_token, "r");
        assert!(token.expires_at.is_some());
        assert!(token.scope.is_none());
    }

    #[test]
    fn test_token_round_trips_through_bytes() {
        let token = OAuthToken {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Some(datetime!(2024-05-01 00:00 UTC)),
            scope: Some("weight".to_string()),
            user_id: Some("228S74".to_string()),
        };
        let bytes = token.to_bytes().unwrap();
        assert_eq!(OAuthToken::from_bytes(&bytes).unwrap(), token);
    }

    #[test]
    fn test_expiry_margin() {
        let previous =
            OAuthToken::from_bytes(br#"{"access_token":"old","refresh_token":"r0","user_id":"228S74"}"#)
                .unwrap();
        let token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            scope: None,
            user_id: None,
        }
        .into_token(datetime!(2024-05-01 00:00 UTC), &previous);

        assert_eq!(token.refresh_token, "r0");
        assert_eq!(token.user_id.as_deref(), Some("228S74"));
        assert!(!token.is_expired_at(datetime!(2024-05-01 00:58 UTC)));
        assert!(token.is_expired_at(datetime!(2024-05-01 00:59 UTC)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = OAuthToken::from_bytes(br#"{"access_token":"sekrit","refresh_token":"sekrit2"}"#)
            .unwrap();
        let debug = format!("{:?}", token);
        assert!(!debug.contains("sekrit"));
        assert_eq!(token.token_type, "Bearer");
        assert!(!token.is_expired());
    }
}
