//! SDK error types.

use thiserror::Error;

/// Error taxonomy surfaced by the SDK.
///
/// Transport and authorization errors reach the original caller's completion
/// unmodified. Storage errors never do; they are logged and folded into the
/// boolean aggregate results of the storage coordinator.
#[derive(Debug, Clone, Error)]
pub enum SdkError {
    /// Network or connectivity problem reaching the token or API endpoint.
    /// Never retried by the SDK.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server explicitly rejected the credential. Triggers the
    /// refresh-and-retry path when a refresh token exists and the retry
    /// bound is not exhausted.
    #[error("Authorization rejected: {0}")]
    AuthorizationRejected(String),

    /// No refresh token is available; the user must sign in again.
    #[error("No refresh token available")]
    Unrefreshable,

    /// The bounded refresh-and-retry count was exceeded.
    #[error("Request retry limit exceeded")]
    RetryExhausted,

    /// A storage backend read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SdkError {
    /// True when the server explicitly rejected the credential, i.e. the
    /// refresh-and-retry path may apply.
    pub fn is_authorization_rejected(&self) -> bool {
        matches!(self, SdkError::AuthorizationRejected(_))
    }
}
