use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SecureStore, StoreError, StoreKey};

/// In-process secure store. Nothing is encrypted or persisted; intended for
/// tests and the demo front-end.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a locked or failing enclave: every operation fails with
    /// `StoreError::Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<StoreKey, String>) -> T,
    ) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        self.with_entries(|e| e.get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.with_entries(|e| {
            e.insert(key, value.to_string());
        })
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        self.with_entries(|e| {
            e.remove(&key);
        })
    }
}
