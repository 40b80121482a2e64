use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use http::HeaderValue;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};
use crate::storage::Storage;

/// Storage key of the bearer credential.
pub const TOKEN_STORAGE_KEY: &str = "authToken";

struct Inner {
    token: Option<Zeroizing<String>>,
    header: Option<HeaderValue>,
}

/// Holds the current bearer credential.
///
/// Every [`set`](TokenStore::set) updates the `Authorization` header value
/// the API client reads before each request, then durable storage. The next
/// outbound call carries the latest credential even when storage fails.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<RwLock<Inner>>,
    storage: Arc<dyn Storage>,
}

impl TokenStore {
    /// Creates an empty store backed by `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                token: None,
                header: None,
            })),
            storage,
        }
    }

    /// Creates a store and rehydrates the credential persisted by a previous run.
    ///
    /// A stored value that cannot be used as a header is discarded.
    pub fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let store = Self::new(storage);
        let stored = store.storage.get(TOKEN_STORAGE_KEY)?;
        if let Some(token) = stored {
            match bearer_header(&token) {
                Ok(header) => {
                    let mut inner = store.write();
                    inner.token = Some(Zeroizing::new(token));
                    inner.header = Some(header);
                    tracing::debug!("🔑 Bearer token restored from storage");
                }
                Err(e) => {
                    tracing::warn!("❌ Discarding unusable stored token: {}", e);
                    store.storage.remove(TOKEN_STORAGE_KEY)?;
                }
            }
        }
        Ok(store)
    }

    /// Writes or clears the credential.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the token cannot be sent as a
    /// header value; nothing is changed in that case. A storage failure is
    /// returned after the in-memory credential has been updated.
    pub fn set(&self, token: Option<&str>) -> Result<()> {
        let header = token.map(bearer_header).transpose()?;
        {
            let mut inner = self.write();
            inner.token = token.map(|t| Zeroizing::new(t.to_string()));
            inner.header = header;
        }

        match token {
            Some(token) => {
                tracing::debug!("🔑 Bearer token updated");
                self.storage.set(TOKEN_STORAGE_KEY, token)
            }
            None => {
                tracing::debug!("🔑 Bearer token cleared");
                self.storage.remove(TOKEN_STORAGE_KEY)
            }
        }
    }

    pub fn get(&self) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.token.as_ref().map(|t| t.to_string())
    }

    /// The `Authorization` header for outbound requests, if a token is set.
    pub fn authorization_header(&self) -> Option<HeaderValue> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.header.clone()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Checks that `token` can be carried in an `Authorization` header.
pub(crate) fn validate_token(token: &str) -> Result<()> {
    bearer_header(token).map(|_| ())
}

fn bearer_header(token: &str) -> Result<HeaderValue> {
    if token.is_empty() {
        return Err(AppError::Validation("Bearer token cannot be empty".to_string()));
    }
    let mut header = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| AppError::Validation("Bearer token contains invalid characters".to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    /// Storage that reads nothing and refuses every write.
    struct FullDisk;

    impl Storage for FullDisk {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(std::io::Error::other("disk full").into())
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    #[test]
    fn set_mirrors_into_header_and_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(storage.clone());

        tokens.set(Some("abc.def")).unwrap();
        assert_eq!(tokens.get().as_deref(), Some("abc.def"));
        assert_eq!(
            tokens.authorization_header().unwrap().to_str().unwrap(),
            "Bearer abc.def"
        );
        assert_eq!(storage.get(TOKEN_STORAGE_KEY).unwrap().as_deref(), Some("abc.def"));

        tokens.set(None).unwrap();
        assert!(tokens.get().is_none());
        assert!(tokens.authorization_header().is_none());
        assert!(storage.get(TOKEN_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn clones_share_the_same_credential() {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        let reader = tokens.clone();
        tokens.set(Some("t1")).unwrap();
        assert_eq!(reader.get().as_deref(), Some("t1"));
    }

    #[test]
    fn invalid_token_changes_nothing() {
        let tokens = TokenStore::new(Arc::new(MemoryStorage::new()));
        tokens.set(Some("good")).unwrap();
        assert!(tokens.set(Some("bad\ntoken")).is_err());
        assert_eq!(tokens.get().as_deref(), Some("good"));
    }

    #[test]
    fn storage_failure_still_updates_the_header() {
        let tokens = TokenStore::new(Arc::new(FullDisk));

        assert!(matches!(tokens.set(Some("t1")), Err(AppError::Storage(_))));
        assert_eq!(tokens.get().as_deref(), Some("t1"));
        assert_eq!(
            tokens.authorization_header().unwrap().to_str().unwrap(),
            "Bearer t1"
        );

        assert!(tokens.set(None).is_err());
        assert!(tokens.get().is_none());
        assert!(tokens.authorization_header().is_none());
    }

    #[test]
    fn load_restores_persisted_token() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(TOKEN_STORAGE_KEY, "persisted").unwrap();
        let tokens = TokenStore::load(storage).unwrap();
        assert_eq!(tokens.get().as_deref(), Some("persisted"));
        assert!(tokens.authorization_header().unwrap().is_sensitive());
    }
}
