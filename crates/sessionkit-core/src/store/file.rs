//! Encrypted-at-rest file store.
//!
//! Each `StoreKey` lives in its own file `<dir>/<key>.enc` holding
//! `nonce (12 bytes) || ChaCha20-Poly1305 ciphertext`, with the key name
//! bound as associated data so files cannot be swapped between keys.
//! The 256-bit encryption key is derived from a passphrase with Argon2id
//! and a random salt kept in `<dir>/store.salt`.
//!
//! Writes go to a uniquely named temporary file which is then renamed over
//! the target, so a reader sees either the old value or the new one.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tempfile::NamedTempFile;
use tracing::debug;

use super::{SecureStore, StoreError, StoreKey};

/// Salt file name inside the store directory
const SALT_FILE: &str = "store.salt";

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct EncryptedFileStore {
    dir: PathBuf,
    key: [u8; KEY_LEN],
}

impl fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Open (or create) a store in `dir`, deriving the encryption key from
    /// `passphrase`. A new random salt is generated the first time.
    pub fn open(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let salt = load_or_create_salt(&dir)?;
        let key = derive_key(passphrase, &salt)?;
        Ok(Self { dir, key })
    }

    /// Open a store with a caller-supplied 256-bit key
    pub fn with_key(dir: impl Into<PathBuf>, key: [u8; KEY_LEN]) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, key })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.enc", key.as_str()))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    fn seal(&self, key: StoreKey, plaintext: &str) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: key.as_str().as_bytes(),
                },
            )
            .map_err(|e| StoreError::Unavailable(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open_sealed(&self, key: StoreKey, sealed: &[u8]) -> Result<String, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Corrupted {
                key,
                reason: "ciphertext too short".to_string(),
            });
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: key.as_str().as_bytes(),
                },
            )
            .map_err(|_| StoreError::Corrupted {
                key,
                reason: "authentication failed (wrong key or tampered file)".to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|e| StoreError::Corrupted {
            key,
            reason: format!("invalid UTF-8: {}", e),
        })
    }

    fn read_entry(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let sealed = match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.open_sealed(key, &sealed).map(Some)
    }

    fn write_entry(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let sealed = self.seal(key, value)?;
        let path = self.entry_path(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&sealed)?;
        tmp.as_file().sync_all()?;
        restrict_permissions(tmp.path())?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        debug!(key = %key, "Wrote encrypted entry");
        Ok(())
    }

    fn delete_entry(&self, key: StoreKey) -> Result<(), StoreError> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&EncryptedFileStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Unavailable(format!("file store task failed: {}", e)))?
    }
}

#[async_trait]
impl SecureStore for EncryptedFileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        self.run(move |s| s.read_entry(key)).await
    }

    async fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.run(move |s| s.write_entry(key, &value)).await
    }

    async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
        self.run(move |s| s.delete_entry(key)).await
    }
}

fn load_or_create_salt(dir: &Path) -> Result<[u8; SALT_LEN], StoreError> {
    let path = dir.join(SALT_FILE);
    let mut salt = [0u8; SALT_LEN];
    match std::fs::read(&path) {
        Ok(bytes) if bytes.len() == SALT_LEN => {
            salt.copy_from_slice(&bytes);
        }
        Ok(bytes) => {
            return Err(StoreError::Unavailable(format!(
                "salt file has {} bytes, expected {}",
                bytes.len(),
                SALT_LEN
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            OsRng.fill_bytes(&mut salt);
            std::fs::write(&path, salt)?;
            restrict_permissions(&path)?;
            debug!(path = %path.display(), "Created store salt");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(salt)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StoreError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Unavailable(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}
