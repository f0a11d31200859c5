//! sessionkit core library.
//!
//! Session and token lifecycle for app front-ends: credentials live in a
//! `SecureStore`, the `TokenService` keeps the token pair fresh, and the
//! `SessionManager` owns the authenticated/anonymous state.
//!
//! Front-ends (the CLI, or a mobile shell through FFI) only depend on this
//! crate.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod store;
pub mod validation;

pub use api::{ApiError, AuthBackend, HttpAuthBackend, InMemoryAuthBackend};
pub use auth::{SessionError, SessionManager, TokenError, TokenService};
pub use config::{BackendKind, Config, StorageKind};
pub use models::{ProfileUpdate, SessionPhase, SessionState, TokenPair, User};
pub use store::{EncryptedFileStore, KeyringStore, MemoryStore, SecureStore, StoreError, StoreKey};
