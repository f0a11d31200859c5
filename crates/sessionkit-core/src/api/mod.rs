//! Remote auth collaborator.
//!
//! This module provides the `AuthBackend` trait and two implementations:
//! `HttpAuthBackend` for a real REST API and `InMemoryAuthBackend` for tests
//! and offline demos. The session layer depends only on the trait.

pub mod backend;
pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::AuthBackend;
pub use client::HttpAuthBackend;
pub use error::ApiError;
pub use memory::InMemoryAuthBackend;
pub use types::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, TokenGrant};
