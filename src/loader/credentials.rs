use crate::error::{InterceptError, Result};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Auth header injected into playlist and key fetches.
#[derive(Clone)]
pub struct Credentials {
    header_key: HeaderName,
    access_token: HeaderValue,
}

impl Credentials {
    /// Validate `header_key: access_token` as an HTTP header.
    ///
    /// # Errors
    /// [`InterceptError::InvalidCredentials`] if the name is not a valid
    /// header token or the value contains control characters.
    pub fn new(header_key: &str, access_token: &str) -> Result<Self> {
        let header_key = HeaderName::from_bytes(header_key.trim().as_bytes()).map_err(|_| {
            InterceptError::InvalidCredentials(format!("Invalid header name '{header_key}'"))
        })?;

        let mut access_token = HeaderValue::from_str(access_token).map_err(|_| {
            InterceptError::InvalidCredentials(format!(
                "Token for header '{header_key}' is not a valid header value"
            ))
        })?;
        access_token.set_sensitive(true);

        Ok(Self {
            header_key,
            access_token,
        })
    }

    /// Build from optional parts: both present, or neither.
    pub fn from_parts(
        header_key: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<Option<Self>> {
        match (header_key, access_token) {
            (Some(key), Some(token)) => Self::new(key, token).map(Some),
            (None, None) => Ok(None),
            (Some(_), None) => Err(InterceptError::InvalidCredentials(
                "Header key given without an access token".to_string(),
            )),
            (None, Some(_)) => Err(InterceptError::InvalidCredentials(
                "Access token given without a header key".to_string(),
            )),
        }
    }

    pub fn header_key(&self) -> &str {
        self.header_key.as_str()
    }

    /// The token as a string, if it is printable ASCII.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.to_str().ok()
    }

    /// Headers to attach to an outgoing fetch.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(1);
        headers.insert(self.header_key.clone(), self.access_token.clone());
        headers
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("header_key", &self.header_key)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Session-scoped credentials, replaceable between requests.
///
/// Requests take a [`CredentialStore::snapshot`] when they are dispatched,
/// so an update never affects a fetch that has already started.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    current: Arc<RwLock<Option<Credentials>>>,
}

impl CredentialStore {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            current: Arc::new(RwLock::new(credentials)),
        }
    }

    pub fn set(&self, credentials: Option<Credentials>) {
        match &credentials {
            Some(c) => info!("Credentials updated, injecting header '{}'", c.header_key()),
            None => info!("Credentials cleared, fetches go out without auth header"),
        }
        *self.current.write() = credentials;
    }

    pub fn snapshot(&self) -> Option<Credentials> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_auth_header() {
        let creds = Credentials::new("X-Auth", "abc").unwrap();
        let headers = creds.headers();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-auth").unwrap(), "abc");
        assert_eq!(creds.header_key(), "x-auth");
        assert_eq!(creds.access_token(), Some("abc"));
    }

    #[test]
    fn rejects_invalid_header_name() {
        assert!(matches!(
            Credentials::new("Bad Header", "abc"),
            Err(InterceptError::InvalidCredentials(_))
        ));
        assert!(Credentials::new("", "abc").is_err());
    }

    #[test]
    fn rejects_control_characters_in_token() {
        assert!(Credentials::new("Authorization", "Bearer a\nb").is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let creds = Credentials::new("Authorization", "Bearer secret-token").unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("authorization"));
    }

    #[test]
    fn from_parts_requires_both_or_neither() {
        assert!(Credentials::from_parts(None, None).unwrap().is_none());
        assert!(Credentials::from_parts(Some("X-Auth"), Some("t")).unwrap().is_some());
        assert!(Credentials::from_parts(Some("X-Auth"), None).is_err());
        assert!(Credentials::from_parts(None, Some("t")).is_err());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_updates() {
        let store = CredentialStore::new(Some(Credentials::new("X-Auth", "old").unwrap()));
        let snapshot = store.snapshot().unwrap();

        store.set(Some(Credentials::new("X-Auth", "new").unwrap()));

        assert_eq!(snapshot.access_token(), Some("old"));
        assert_eq!(store.snapshot().unwrap().access_token(), Some("new"));

        store.set(None);
        assert!(store.snapshot().is_none());
    }
}
