// Navigation hook used when a session ends

use std::sync::atomic::{AtomicBool, Ordering};

/// Unauthenticated entry point of the console
pub const LOGIN_ENTRY_POINT: &str = "/";

/// Where the user is sent when the session cannot be recovered
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Default navigator: logs the redirect and remembers that the session ended
#[derive(Debug, Default)]
pub struct LoginRedirect {
    ended: AtomicBool,
}

impl LoginRedirect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a redirect to the entry point has happened
    pub fn session_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

impl Navigator for LoginRedirect {
    fn navigate(&self, path: &str) {
        if path == LOGIN_ENTRY_POINT {
            self.ended.store(true, Ordering::SeqCst);
        }
        tracing::warn!(path = %path, "Session ended, redirecting to login");
    }
}
