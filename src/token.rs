//! Access token value object and expiry policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An issued access token. Immutable once issued; a refresh produces a new
/// value that supersedes the old one, it never mutates it in place.
///
/// Equality is by value: two tokens with identical fields are interchangeable
/// for persistence comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque bearer string attached to API requests.
    pub access_token: String,
    /// Credential used to mint a new access token without re-authenticating.
    /// A token without one cannot be auto-refreshed.
    pub refresh_token: Option<String>,
    /// Absolute expiry timestamp, always set at construction.
    pub expires_at: DateTime<Utc>,
    /// Subject of the token; absent for app-level (client-credentials) tokens.
    pub user_id: Option<String>,
    /// True when the token was obtained via the client-credentials flow.
    pub is_client_token: bool,
}

impl AccessToken {
    /// True iff `now` has reached the expiry timestamp. Pure, no I/O.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime at `now`; negative once expired.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// True when the token carries a refresh credential.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Wire shape returned by the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, relative to the moment of issue.
    pub expires_in: i64,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TokenResponse {
    /// Convert into an [`AccessToken`], anchoring the expiry at `now`.
    ///
    /// A response without a subject is an app-level token from the
    /// client-credentials flow.
    pub fn into_token(self, now: DateTime<Utc>) -> AccessToken {
        let is_client_token = self.user_id.is_none();
        AccessToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + Duration::seconds(self.expires_in),
            user_id: self.user_id,
            is_client_token,
        }
    }
}
