use async_trait::async_trait;

use super::types::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, TokenGrant};
use super::ApiError;
use crate::models::{ProfileUpdate, User};

/// The remote auth collaborator.
///
/// The session layer does not branch on the error kind: any `ApiError`
/// is an exchange failure.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError>;

    /// Tell the server the session is over. Callers treat failure as
    /// non-fatal.
    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<User, ApiError>;

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError>;

    async fn change_password(
        &self,
        access_token: &str,
        request: &ChangePasswordRequest,
    ) -> Result<(), ApiError>;

    async fn delete_account(&self, access_token: &str) -> Result<(), ApiError>;
}
