use anyhow::Context;
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    token_preview, ActiveOrganization, CredentialStore, Credentials, RefreshCoordinator,
    RefreshOutcome, Storage, TokenEndpoint,
};
use crate::authenticator::RequestAuthenticator;
use crate::error::{truncate_body, Result, SessionError};
use crate::navigator::{Navigator, LOGIN_ENTRY_POINT};

pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Connection and endpoint settings for a [`SessionClient`]
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub base_url: Url,
    pub login_path: String,
    pub refresh_path: String,
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Upper bound on the refresh call; requests queued behind it wait at most this long
    pub refresh_timeout: Duration,
}

impl ClientSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            max_connections: 20,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

/// Append `path` to `base`, keeping any path prefix `base` already has
pub fn join_path(base: &Url, path: &str) -> anyhow::Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("Invalid request URL: {}", joined))
}

/// Authenticated HTTP client shared by every console view.
///
/// Every request gets credentials injected just before it is sent. A 401 triggers
/// at most one refresh per failure episode (see [`RefreshCoordinator`]) and the
/// request is replayed once with the new token.
pub struct SessionClient {
    /// Shared HTTP client with connection pooling
    client: Client,
    base_url: Url,
    store: CredentialStore,
    authenticator: RequestAuthenticator,
    coordinator: RefreshCoordinator,
    endpoint: TokenEndpoint,
    navigator: Arc<dyn Navigator>,
}

impl SessionClient {
    pub fn new(
        settings: ClientSettings,
        storage: Arc<dyn Storage>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_connections)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = TokenEndpoint::new(
            join_path(&settings.base_url, &settings.login_path)?,
            join_path(&settings.base_url, &settings.refresh_path)?,
            settings.refresh_timeout,
        )?;

        let store = CredentialStore::new(storage);

        Ok(Self {
            client,
            base_url: settings.base_url,
            authenticator: RequestAuthenticator::new(store.clone()),
            store,
            coordinator: RefreshCoordinator::new(),
            endpoint,
            navigator,
        })
    }

    /// Log in and store the resulting token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let credentials = self.endpoint.login(email, password).await?;
        self.store.save(&credentials)?;
        tracing::debug!(
            access_token = %token_preview(&credentials.access_token),
            "Stored new credentials"
        );
        Ok(())
    }

    /// Drop both tokens. The active organization is kept.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.store.read()?.is_some())
    }

    pub fn credentials(&self) -> Result<Option<Credentials>> {
        Ok(self.store.read()?)
    }

    pub fn active_organization(&self) -> Result<Option<ActiveOrganization>> {
        Ok(self.store.active_organization()?)
    }

    /// Takes effect on the next request
    pub fn switch_organization(&self, id: &str) -> Result<()> {
        self.store.set_active_organization(id)?;
        tracing::info!(org_id = %id, "Switched organization");
        Ok(())
    }

    pub fn clear_organization(&self) -> Result<()> {
        self.store.clear_active_organization()?;
        Ok(())
    }

    /// Whether a token refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// Start a request against the API base URL
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = join_path(&self.base_url, path)
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        Ok(self.client.request(method, url))
    }

    /// Build and execute
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Execute a request with credential injection and 401 recovery.
    ///
    /// Statuses other than 401 are returned unchanged; transport errors surface as
    /// [`SessionError::Network`]. A request is replayed at most once.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        let mut retried = false;
        let mut replay_token: Option<String> = None;

        loop {
            let mut attempt = request
                .try_clone()
                .ok_or(SessionError::RequestNotCloneable)?;

            let sent_token = match replay_token.take() {
                Some(token) => self
                    .authenticator
                    .authorize_with(&mut attempt, Some(token.as_str()))?,
                None => self.authenticator.authorize(&mut attempt)?,
            };

            let response = self.client.execute(attempt).await.map_err(|e| {
                tracing::warn!(
                    request_id = %request_id,
                    url = %url,
                    error = %e,
                    "HTTP request error"
                );
                SessionError::Network(e)
            })?;

            let status = response.status();
            if status != StatusCode::UNAUTHORIZED {
                tracing::debug!(request_id = %request_id, status = %status, "Received HTTP response");
                return Ok(response);
            }

            if retried {
                tracing::error!(
                    request_id = %request_id,
                    method = %method,
                    url = %url,
                    "Received 401 after token refresh, giving up"
                );
                return Err(SessionError::Unauthorized);
            }

            tracing::warn!(request_id = %request_id, url = %url, "Received 401, recovering session");
            retried = true;
            replay_token = Some(self.recover_token(sent_token).await?);
        }
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        decode_json(check_status(response).await?).await
    }

    /// POST a JSON body to `path` and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, path)?.json(body))
            .await?;
        decode_json(check_status(response).await?).await
    }

    /// DELETE `path`, discarding any response body
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(self.request(Method::DELETE, path)?).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Token to replay with after a 401
    async fn recover_token(&self, sent_token: Option<String>) -> Result<String> {
        let Some(refresh_token) = self.store.refresh_token()? else {
            tracing::warn!("Received 401 with no refresh token stored");
            return Err(SessionError::Unauthorized);
        };

        self.coordinator
            .refreshed_token(|| self.refresh_and_commit(sent_token, refresh_token))
            .await
    }

    /// Leader side of a refresh: call the endpoint, then persist or tear down
    async fn refresh_and_commit(
        &self,
        sent_token: Option<String>,
        refresh_token: String,
    ) -> RefreshOutcome {
        // A previous episode already replaced the token this request carried
        if let Ok(Some(current)) = self.store.access_token() {
            if sent_token.as_deref() != Some(current.as_str()) {
                tracing::debug!("Request carried a stale token, replaying with the current one");
                return Ok(current);
            }
        }

        match self.endpoint.refresh(&refresh_token).await {
            Ok(refreshed) => {
                let persisted = match &refreshed.refresh_token {
                    Some(rotated) => self.store.save(&Credentials {
                        access_token: refreshed.access_token.clone(),
                        refresh_token: rotated.clone(),
                    }),
                    None => self.store.set_access_token(&refreshed.access_token),
                };
                if let Err(e) = persisted {
                    tracing::error!("Failed to persist refreshed token: {:#}", e);
                }
                Ok(refreshed.access_token)
            }
            Err(failure) => {
                tracing::error!(status = ?failure.status, "Token refresh failed: {}", failure);
                if let Err(e) = self.store.clear() {
                    tracing::error!("Failed to clear credentials: {:#}", e);
                }
                self.navigator.navigate(LOGIN_ENTRY_POINT);
                Err(failure)
            }
        }
    }
}

/// Map non-success statuses to [`SessionError::Api`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let error_text = response.text().await.unwrap_or_default();
    tracing::error!(
        status = status.as_u16(),
        url = %url,
        response_body = %truncate_body(&error_text),
        "HTTP request failed with error response"
    );
    Err(SessionError::Api {
        status: status.as_u16(),
        message: truncate_body(&error_text),
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().clone();
    response
        .json()
        .await
        .map_err(|e| SessionError::InvalidResponse(format!("{}: {}", url, e)))
}
