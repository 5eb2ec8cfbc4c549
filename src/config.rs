//! SDK client configuration.

use serde::Deserialize;

/// API version segment used when no other version is configured.
pub const DEFAULT_API_VERSION: &str = "2";

/// Identifier under which the token record is filed in every backend.
const DEFAULT_STORAGE_IDENTIFIER: &str = "access_token";

/// Static configuration for one SDK instance.
///
/// Field names use snake_case to match the host config file format.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Client ID issued by the identity platform.
    pub client_id: String,
    /// Client secret issued by the identity platform.
    pub client_secret: String,
    /// Client ID to use when generating a one-time code for server-side use.
    /// Defaults to `client_id`.
    #[serde(default)]
    pub server_client_id: Option<String>,
    /// Base URL of the identity server, e.g. `https://id.example.com`.
    pub server_url: String,
    /// Redirect URI registered for the host application's login flow.
    pub redirect_uri: String,
    /// API version segment used when building request paths.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Identifier under which the token record is persisted, shared by all
    /// storage backends for one installation.
    #[serde(default = "default_storage_identifier")]
    pub storage_identifier: String,
    /// Maximum refresh-and-retry cycles for one request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ClientConfig {
    /// Minimal configuration; the remaining fields take their defaults.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        server_url: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            server_client_id: None,
            server_url: server_url.into(),
            redirect_uri: redirect_uri.into(),
            api_version: default_api_version(),
            storage_identifier: default_storage_identifier(),
            max_retries: default_max_retries(),
        }
    }

    /// URL of the token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.server_url.trim_end_matches('/'))
    }

    /// Client ID to present when requesting a one-time code.
    pub fn one_time_code_client_id(&self) -> &str {
        self.server_client_id.as_deref().unwrap_or(&self.client_id)
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_storage_identifier() -> String {
    DEFAULT_STORAGE_IDENTIFIER.to_string()
}

fn default_max_retries() -> u32 {
    crate::auth::DEFAULT_MAX_RETRIES
}
