//! API client for the blog's authentication endpoints.
//!
//! [`AuthApi`] is the seam the session manager talks through; [`ApiClient`]
//! is the `reqwest` implementation used against a real server.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::models::{Credentials, User};

use super::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access_token")]
    pub access: String,
    #[serde(alias = "refresh_token")]
    pub refresh: String,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(alias = "access_token")]
    pub access: String,
    /// Servers that do not rotate refresh tokens leave this out.
    #[serde(default, alias = "refresh_token")]
    pub refresh: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// The remote authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /login`
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError>;

    /// `POST /refresh`
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError>;

    /// `POST /logout` - best-effort server-side invalidation.
    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError>;
}

/// HTTP client for the authentication API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &SessionConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check if response is successful, returning a classified error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let url = self.url("login");
        debug!(url = %url, username = %credentials.username, "Sending login request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(credentials)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "login").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let url = self.url("refresh");
        debug!(url = %url, "Sending token refresh request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "refresh").await
    }

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError> {
        let url = self.url("logout");
        debug!(url = %url, "Sending logout request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }
}
