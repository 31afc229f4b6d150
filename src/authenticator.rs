// Per-request credential injection

use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Request;

use crate::auth::{is_absent_sentinel, CredentialStore};

/// Header carrying the active organization
pub const ORG_ID_HEADER: HeaderName = HeaderName::from_static("x-org-id");

/// Attaches `Authorization` and `X-Org-ID` headers to outgoing requests.
///
/// Reads the store on every call, so an organization switch applies to the very
/// next request. Nothing is cached on the shared HTTP client.
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: CredentialStore,
}

impl RequestAuthenticator {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Attach credentials from the store. Returns the bearer token that was attached.
    pub fn authorize(&self, request: &mut Request) -> anyhow::Result<Option<String>> {
        let token = self.store.access_token()?;
        self.authorize_with(request, token.as_deref())
    }

    /// Attach `token` (typically a freshly refreshed one) instead of the stored token
    pub fn authorize_with(
        &self,
        request: &mut Request,
        token: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.remove(&ORG_ID_HEADER);

        let mut attached = None;
        if let Some(token) = token.filter(|t| is_usable_token(t)) {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                    attached = Some(token.to_string());
                }
                Err(_) => tracing::warn!("Access token is not a valid header value, skipping"),
            }
        }

        if let Some(org) = self.store.active_organization()? {
            match HeaderValue::from_str(&org.id) {
                Ok(value) => {
                    headers.insert(ORG_ID_HEADER, value);
                }
                Err(_) => tracing::warn!(org_id = %org.id, "Organization id is not a valid header value, skipping"),
            }
        }

        Ok(attached)
    }
}

/// Non-empty and not a placeholder like `"undefined"`
fn is_usable_token(token: &str) -> bool {
    !token.trim().is_empty() && !is_absent_sentinel(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, MemoryStorage, Storage, ACCESS_TOKEN_KEY};
    use reqwest::{Method, Url};
    use std::sync::Arc;

    fn setup() -> (RequestAuthenticator, CredentialStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        (RequestAuthenticator::new(store.clone()), store, storage)
    }

    fn request() -> Request {
        Request::new(
            Method::GET,
            Url::parse("https://console.example.com/servers").unwrap(),
        )
    }

    #[test]
    fn test_attaches_bearer_token() {
        let (authenticator, store, _) = setup();
        store
            .save(&Credentials {
                access_token: "A1".to_string(),
                refresh_token: "R1".to_string(),
            })
            .unwrap();

        let mut req = request();
        let attached = authenticator.authorize(&mut req).unwrap();

        assert_eq!(attached.as_deref(), Some("A1"));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer A1");
        assert!(req.headers()[AUTHORIZATION].is_sensitive());
        assert!(req.headers().get(&ORG_ID_HEADER).is_none());
    }

    #[test]
    fn test_no_token_no_header() {
        let (authenticator, _, _) = setup();
        let mut req = request();
        assert_eq!(authenticator.authorize(&mut req).unwrap(), None);
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_undefined_token_is_not_attached() {
        let (authenticator, _, storage) = setup();
        storage.set(ACCESS_TOKEN_KEY, "undefined").unwrap();

        let mut req = request();
        authenticator.authorize(&mut req).unwrap();
        assert!(req.headers().get(AUTHORIZATION).is_none());

        let mut req = request();
        authenticator
            .authorize_with(&mut req, Some("undefined"))
            .unwrap();
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_org_header_follows_store() {
        let (authenticator, store, _) = setup();
        store.set_active_organization("org-1").unwrap();

        let mut first = request();
        authenticator.authorize(&mut first).unwrap();
        assert_eq!(first.headers()[&ORG_ID_HEADER], "org-1");

        store.set_active_organization("org-2").unwrap();
        let mut second = request();
        authenticator.authorize(&mut second).unwrap();

        assert_eq!(second.headers()[&ORG_ID_HEADER], "org-2");
        // Already-built requests are not rewritten
        assert_eq!(first.headers()[&ORG_ID_HEADER], "org-1");
    }

    #[test]
    fn test_explicit_token_overrides_stale_header() {
        let (authenticator, store, _) = setup();
        store
            .save(&Credentials {
                access_token: "T1".to_string(),
                refresh_token: "R1".to_string(),
            })
            .unwrap();

        let mut req = request();
        authenticator.authorize(&mut req).unwrap();
        authenticator.authorize_with(&mut req, Some("T2")).unwrap();

        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer T2");
    }

    #[test]
    fn test_invalid_header_value_is_skipped() {
        let (authenticator, _, _) = setup();
        let mut req = request();
        let attached = authenticator
            .authorize_with(&mut req, Some("bad\ntoken"))
            .unwrap();
        assert_eq!(attached, None);
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }
}
