//! HTTP clients for the token endpoint and the authenticated API.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::StatusCode;

use crate::config::ClientConfig;
use crate::error::SdkError;
use crate::request::{ApiRequest, ApiResponse, Method};
use crate::token::{AccessToken, TokenResponse};

/// The token exchange service: mints and refreshes access tokens.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Exchange an authorization code from the host's login flow for an
    /// initial token.
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, SdkError>;

    /// Mint a new access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, SdkError>;

    /// Obtain an app-level token via the client-credentials grant.
    async fn client_credentials(&self) -> Result<AccessToken, SdkError>;
}

/// Opaque request transport: sends one API request with a bearer token
/// attached and produces a response or a transport error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, SdkError>;
}

/// [`TokenService`] backed by the identity server's OAuth token endpoint.
pub struct HttpTokenService {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpTokenService {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<AccessToken, SdkError> {
        let response = self
            .http
            .post(self.config.token_url())
            .form(params)
            .send()
            .await
            .map_err(|e| SdkError::Transport(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        // OAuth grant failures come back as 400 (invalid_grant) or 401.
        if status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::AuthorizationRejected(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(SdkError::Transport(format!(
                "token endpoint returned {status}"
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| SdkError::Internal(format!("malformed token response: {e}")))?;
        Ok(parsed.into_token(Utc::now()))
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, SdkError> {
        debug!("Exchanging authorization code for an access token");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
            ("code", code),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, SdkError> {
        debug!("Refreshing access token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn client_credentials(&self) -> Result<AccessToken, SdkError> {
        debug!("Requesting app-level token via client credentials");
        self.token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }
}

/// [`Transport`] backed by reqwest against the configured server.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.server_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, SdkError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Delete => self.http.delete(&url),
        };
        builder = builder.bearer_auth(bearer);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SdkError::Transport(format!("request to {} failed: {e}", request.path)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SdkError::AuthorizationRejected(format!(
                "{} rejected with {status}",
                request.path
            )));
        }

        // A non-JSON or empty body is not an error at this layer.
        let body = response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
