//! Secure credential storage.
//!
//! This module provides the `SecureStore` trait and its implementations:
//! - `KeyringStore`: OS keychain via the keyring crate
//! - `EncryptedFileStore`: ChaCha20-Poly1305 encrypted files on disk
//! - `MemoryStore`: in-process map for tests and demos
//!
//! Exactly four logical keys are persisted (see `StoreKey`). Atomicity is
//! per key only; there are no multi-key transactions at this layer.

pub mod file;
pub mod keychain;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// The logical keys held by a secure store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Access token, raw string
    AccessToken,
    /// Refresh token, raw string
    RefreshToken,
    /// JSON-serialized `User`
    User,
    /// Access token expiry as epoch milliseconds
    ExpiresAt,
}

impl StoreKey {
    pub const ALL: [StoreKey; 4] = [
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::User,
        StoreKey::ExpiresAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AccessToken => "auth_token",
            StoreKey::RefreshToken => "refresh_token",
            StoreKey::User => "auth_user",
            StoreKey::ExpiresAt => "token_expires_at",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage failures. Every variant means the secure store could not
/// complete the request; callers do not branch on the variant.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Secure storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored value for {key} is corrupted: {reason}")]
    Corrupted { key: StoreKey, reason: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable, confidential key/value persistence.
///
/// `get` never returns a partially written value, `set` overwrites
/// silently and `delete` of an absent key is not an error.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_names() {
        assert_eq!(StoreKey::AccessToken.as_str(), "auth_token");
        assert_eq!(StoreKey::RefreshToken.as_str(), "refresh_token");
        assert_eq!(StoreKey::User.as_str(), "auth_user");
        assert_eq!(StoreKey::ExpiresAt.as_str(), "token_expires_at");
    }

    #[test]
    fn test_store_key_all_is_distinct() {
        let mut names: Vec<_> = StoreKey::ALL.iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}
