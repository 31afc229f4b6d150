// Authentication module
// Credential storage, login/refresh calls and refresh coordination

mod coordinator;
mod credentials;
mod endpoint;
mod storage;
mod types;

pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use credentials::{
    is_absent_sentinel, CredentialStore, ACCESS_TOKEN_KEY, ACTIVE_ORG_KEY, REFRESH_TOKEN_KEY,
};
pub use endpoint::TokenEndpoint;
pub use storage::{MemoryStorage, SqliteStorage, Storage};
pub use types::{token_preview, ActiveOrganization, Credentials, RefreshedToken};
