//! OneID client SDK.
//!
//! Authenticates an application against the OneID identity platform using
//! OAuth2-style access tokens and performs authenticated API calls on behalf
//! of the signed-in user. The heart of the crate is the
//! [`TokenLifecycleManager`]: it owns the current access token, refreshes it
//! when it expires (serializing concurrent refreshes into one exchange),
//! retries requests that failed on a stale credential within a bounded retry
//! count, and persists tokens across a configurable set of storage backends
//! with read preference and write fan-out.
//!
//! The interactive login flow stays in the host application: present your
//! login UI, obtain an authorization code via your redirect URI, and hand the
//! code to [`TokenLifecycleManager::authorize_with_code`].
//!
//! ```no_run
//! use oneid_sdk::{ApiRequest, ClientConfig, TokenLifecycleManager};
//!
//! # async fn example() -> Result<(), oneid_sdk::SdkError> {
//! let config = ClientConfig::new(
//!     "client-id",
//!     "client-secret",
//!     "https://id.example.com",
//!     "app://redirect",
//! );
//! let client = TokenLifecycleManager::from_config(config)?;
//!
//! client.authorize_with_code("code-from-redirect").await?;
//! let me = client.send(ApiRequest::get("/api/2/me")).await?;
//! println!("me: {}", me.body);
//! # Ok(())
//! # }
//! ```

mod auth;
mod config;
mod error;
mod request;
mod storage;
mod token;

pub use auth::{
    HttpTokenService, HttpTransport, TokenLifecycleManager, TokenService, Transport,
    DEFAULT_MAX_RETRIES,
};
pub use config::ClientConfig;
pub use error::SdkError;
pub use request::{ApiRequest, ApiResponse, Method};
pub use storage::{
    BackendKind, SecureStore, SimpleStore, TokenStorage, TokenStore, SCHEMA_VERSION,
};
pub use token::{AccessToken, TokenResponse};
