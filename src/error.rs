// Error handling module
// Defines the result type of the authenticated request path

use thiserror::Error;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Why a token refresh did not produce a new access token.
///
/// Cloneable so a single failure can reject every request queued behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RefreshFailure {
    /// HTTP status of the refresh response, if the backend answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl RefreshFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Errors surfaced to callers of the session client
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport failure, propagated unchanged
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 401 on a request that was already replayed, or with no refresh token to recover
    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,

    /// The refresh call itself failed; credentials have been cleared
    #[error("Token refresh failed: {0}")]
    RefreshFailed(RefreshFailure),

    /// The task driving the refresh went away before it settled
    #[error("Token refresh was aborted before completing")]
    RefreshAborted,

    /// Login rejected by the backend
    #[error("Login failed: {status} - {message}")]
    LoginFailed { status: u16, message: String },

    /// An operation needed stored credentials and found none
    #[error("Not authenticated - log in first")]
    NotAuthenticated,

    /// Non-success status returned by a REST endpoint
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Request could not be built (bad URL or path)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Replay requires a request whose body can be cloned
    #[error("Request body is not cloneable")]
    RequestNotCloneable,

    /// Response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Credential storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    /// Whether the session ended and the user has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            SessionError::Unauthorized
                | SessionError::RefreshFailed(_)
                | SessionError::NotAuthenticated
        )
    }
}

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }

    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}... (truncated, {} total bytes)",
        &body[..end],
        body.len()
    )
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
