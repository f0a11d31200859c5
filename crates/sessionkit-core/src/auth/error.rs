use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

/// Failures of the token service
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token exchange failed: {0}")]
    Exchange(#[from] ApiError),
}

/// Failures surfaced by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Another session operation is already in progress")]
    Busy,

    #[error("Not signed in")]
    NotAuthenticated,

    /// Login or registration rejected by the server
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Secure storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Authentication exchange failed: {0}")]
    AuthExchange(#[from] ApiError),
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Storage(e) => SessionError::Storage(e),
            TokenError::NoRefreshToken => SessionError::NoRefreshToken,
            TokenError::Exchange(e) => SessionError::AuthExchange(e),
        }
    }
}

impl SessionError {
    /// Classify a failed login/register exchange. A 401 there means the
    /// credentials were wrong, not that a session expired.
    pub(crate) fn from_credentials_exchange(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => SessionError::InvalidCredentials,
            other => SessionError::AuthExchange(other),
        }
    }

    /// Short message suitable for showing next to a form
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidInput(what) => format!("Please fill in {}", what),
            SessionError::Busy => "Please wait for the current request to finish".to_string(),
            SessionError::NotAuthenticated => "Please sign in first".to_string(),
            SessionError::Storage(_) => {
                "Secure storage is unavailable. Unlock the device and try again.".to_string()
            }
            SessionError::NoRefreshToken => {
                "Session expired. Please sign in again.".to_string()
            }
            SessionError::InvalidCredentials => "Incorrect email or password".to_string(),
            SessionError::AuthExchange(ApiError::Unauthorized) => {
                "Session expired. Please sign in again.".to_string()
            }
            SessionError::AuthExchange(ApiError::Conflict(_)) => {
                "This email is already registered".to_string()
            }
            SessionError::AuthExchange(ApiError::NetworkError(e)) if e.is_timeout() => {
                "The request took too long. Please try again.".to_string()
            }
            SessionError::AuthExchange(ApiError::NetworkError(_) | ApiError::Unreachable(_)) => {
                "No internet connection. Check your connection.".to_string()
            }
            SessionError::AuthExchange(ApiError::ServerError(_)) => {
                "Server error. Please try again later.".to_string()
            }
            SessionError::AuthExchange(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}
