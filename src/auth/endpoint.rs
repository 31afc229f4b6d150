// Login and token refresh calls

use anyhow::Context;
use reqwest::{Client, Url};
use std::time::Duration;

use super::types::{Credentials, LoginRequest, RefreshRequest, RefreshedToken, TokenPair};
use crate::error::{truncate_body, RefreshFailure, SessionError};

/// Backend authentication endpoints
#[derive(Clone)]
pub struct TokenEndpoint {
    /// Dedicated client so the refresh timeout does not apply to regular requests
    client: Client,
    login_url: Url,
    refresh_url: Url,
}

impl TokenEndpoint {
    pub fn new(login_url: Url, refresh_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create token endpoint HTTP client")?;

        Ok(Self {
            client,
            login_url,
            refresh_url,
        })
    }

    /// Exchange email and password for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials, SessionError> {
        tracing::info!(email = %email, "Logging in...");

        let response = self
            .client
            .post(self.login_url.clone())
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Login rejected");
            return Err(SessionError::LoginFailed {
                status: status.as_u16(),
                message: truncate_body(&error_text),
            });
        }

        let pair: TokenPair = response
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(format!("login response: {}", e)))?;

        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(SessionError::InvalidResponse(
                "login response does not contain both tokens".to_string(),
            ));
        }

        tracing::info!("Login successful");
        Ok(pair.into())
    }

    /// Obtain a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshFailure> {
        tracing::info!("Refreshing access token...");

        let response = self
            .client
            .post(self.refresh_url.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                RefreshFailure::new(None, format!("refresh request {}: {}", kind, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %truncate_body(&error_text),
                "Token refresh rejected"
            );
            return Err(RefreshFailure::new(
                Some(status.as_u16()),
                format!("{} - {}", status, truncate_body(&error_text)),
            ));
        }

        let data: RefreshedToken = response.json().await.map_err(|e| {
            RefreshFailure::new(
                Some(status.as_u16()),
                format!("failed to parse refresh response: {}", e),
            )
        })?;

        if data.access_token.is_empty() {
            return Err(RefreshFailure::new(
                Some(status.as_u16()),
                "refresh response does not contain access_token",
            ));
        }

        tracing::info!("Access token refreshed");
        Ok(data)
    }
}
