//! OAuth token providers.

use async_trait::async_trait;
use serde::Deserialize;
use shipyard_config::AuthConfig;
use shipyard_core::{Error, Result, TokenProvider};
use tracing::debug;

/// Fetches a token from a UAA-style OAuth endpoint with the password grant.
///
/// Every call performs a fresh token request.
pub struct UaaTokenClient {
    client: reqwest::Client,
    config: AuthConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl UaaTokenClient {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TokenProvider for UaaTokenClient {
    async fn access_token(&self) -> Result<String> {
        debug!(token_url = %self.config.token_url, "Requesting access token");

        let params = [
            ("grant_type", "password"),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
            ("response_type", "token"),
        ];

        let response = self
            .client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(""))
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                code: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(Error::Decode("no access token in response".to_string()));
        }

        Ok(token.access_token)
    }
}

/// A fixed token, for tests and pre-issued credentials.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
