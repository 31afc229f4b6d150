// Credential store: tokens and active organization over durable storage

use anyhow::{Context, Result};
use std::sync::Arc;

use super::storage::Storage;
use super::types::{ActiveOrganization, Credentials};

/// Storage key for the access token.
/// Other console components read these keys directly; they must not change.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the active organization id
pub const ACTIVE_ORG_KEY: &str = "active_org_id";

/// Stored values that mean "no value"
const ABSENT_SENTINELS: &[&str] = &["undefined", "null"];

/// Sole owner of the stored credentials
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist both tokens
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let access = encode(&credentials.access_token)?;
        let refresh = encode(&credentials.refresh_token)?;
        self.storage
            .set_all(&[
                (ACCESS_TOKEN_KEY, access.as_str()),
                (REFRESH_TOKEN_KEY, refresh.as_str()),
            ])
            .context("Failed to save credentials")
    }

    /// Both tokens, or `None` if either is missing
    pub fn read(&self) -> Result<Option<Credentials>> {
        let access_token = self.access_token()?;
        let refresh_token = self.refresh_token()?;

        Ok(match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(Credentials {
                access_token,
                refresh_token,
            }),
            (None, None) => None,
            _ => {
                tracing::warn!("Stored credentials are incomplete, treating session as absent");
                None
            }
        })
    }

    /// Remove both tokens. The active organization is left alone.
    pub fn clear(&self) -> Result<()> {
        self.storage
            .remove_all(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .context("Failed to clear credentials")
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.read_value(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.read_value(REFRESH_TOKEN_KEY)
    }

    /// Replace the access token after a refresh
    pub fn set_access_token(&self, token: &str) -> Result<()> {
        self.storage
            .set(ACCESS_TOKEN_KEY, &encode(token)?)
            .context("Failed to store access token")
    }

    pub fn active_organization(&self) -> Result<Option<ActiveOrganization>> {
        Ok(self
            .read_value(ACTIVE_ORG_KEY)?
            .map(|id| ActiveOrganization { id }))
    }

    pub fn set_active_organization(&self, id: &str) -> Result<()> {
        self.storage
            .set(ACTIVE_ORG_KEY, &encode(id)?)
            .context("Failed to store active organization")
    }

    pub fn clear_active_organization(&self) -> Result<()> {
        self.storage
            .remove(ACTIVE_ORG_KEY)
            .context("Failed to clear active organization")
    }

    fn read_value(&self, key: &str) -> Result<Option<String>> {
        let raw = self.storage.get(key)?;
        Ok(raw.as_deref().and_then(normalize_stored_value))
    }
}

/// Values are stored as JSON strings
fn encode(value: &str) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode stored value")
}

/// Decode a stored value and map sentinels/empty values to `None`.
///
/// JSON strings are unescaped; anything else written by other components only
/// has one pair of surrounding quotes stripped.
pub fn normalize_stored_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let value = match serde_json::from_str::<String>(trimmed) {
        Ok(decoded) => decoded,
        Err(_) => strip_quotes(trimmed).to_string(),
    };

    if value.is_empty() || is_absent_sentinel(&value) {
        return None;
    }
    Some(value)
}

/// Whether a token value is one of the placeholders for "no token"
pub fn is_absent_sentinel(value: &str) -> bool {
    ABSENT_SENTINELS.contains(&value)
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
