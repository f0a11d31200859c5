use async_trait::async_trait;
use keyring::Entry;

use super::{SecureStore, StoreError, StoreKey};

/// Default keychain service name
pub const DEFAULT_SERVICE_NAME: &str = "sessionkit";

/// Secure store backed by the OS keychain. Each `StoreKey` is one
/// keychain entry under `service`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(service: &str, key: StoreKey) -> Result<Entry, StoreError> {
        Entry::new(service, key.as_str()).map_err(map_keyring_error)
    }

    /// Run a blocking keychain call off the async executor
    async fn run<T, F>(&self, key: StoreKey, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StoreError> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || op(Self::entry(&service, key)?))
            .await
            .map_err(|e| StoreError::Unavailable(format!("keychain task failed: {}", e)))?
    }
}

fn map_keyring_error(err: keyring::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl SecureStore for KeyringStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        self.run(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        })
        .await
    }

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.run(key, move |entry| {
            entry.set_password(&value).map_err(map_keyring_error)
        })
        .await
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        self.run(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringStore::default().service(), "sessionkit");
        assert_eq!(KeyringStore::new("my-app").service(), "my-app");
    }

    #[test]
    fn test_keyring_errors_map_to_unavailable() {
        let err = map_keyring_error(keyring::Error::NoStorageAccess(Box::new(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "device locked"),
        )));
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
