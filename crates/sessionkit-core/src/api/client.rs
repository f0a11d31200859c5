//! HTTP implementation of `AuthBackend`.
//!
//! Talks JSON to the app's REST API. Authenticated calls carry the
//! access token as a bearer header; responses wrapped in a
//! `{ "data": ... }` envelope are unwrapped before decoding.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::AuthBackend;
use super::types::{
    AuthResponse, ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest, TokenGrant,
};
use super::ApiError;
use crate::models::{ProfileUpdate, User};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

mod endpoints {
    pub const LOGIN: &str = "/auth/login";
    pub const REGISTER: &str = "/auth/register";
    pub const LOGOUT: &str = "/auth/logout";
    pub const REFRESH: &str = "/auth/refresh";
    pub const PROFILE: &str = "/user/profile";
    pub const CHANGE_PASSWORD: &str = "/user/change-password";
    pub const ACCOUNT: &str = "/user/account";
}

/// Auth backend over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn encode<B: Serialize>(body: &B) -> Result<Value, ApiError> {
        serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))
    }

    /// Send a request, retrying on 429 with exponential backoff.
    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let started = Instant::now();
            let response = request.send().await?;
            let status = response.status();
            debug!(
                method = %method,
                path = path,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "API request"
            );

            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    path = path,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    /// Decode a JSON response, unwrapping a `data` envelope if present
    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let value: Value = response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })?;

        let payload = match value {
            Value::Object(mut map) => match map.remove("data") {
                Some(data) => data,
                None => Value::Object(map),
            },
            other => other,
        };

        serde_json::from_value(payload).map_err(|e| {
            ApiError::InvalidResponse(format!("Unexpected response shape from {}: {}", path, e))
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let response = self.send(method, path, token, body).await?;
        Self::decode(response, path).await
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let body = Self::encode(request)?;
        self.call(Method::POST, endpoints::LOGIN, None, Some(&body))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let body = Self::encode(request)?;
        self.call(Method::POST, endpoints::REGISTER, None, Some(&body))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        let body = Self::encode(&RefreshRequest { refresh_token })?;
        self.call(Method::POST, endpoints::REFRESH, None, Some(&body))
            .await
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        self.send(Method::POST, endpoints::LOGOUT, Some(access_token), None)
            .await?;
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<User, ApiError> {
        self.call(Method::GET, endpoints::PROFILE, Some(access_token), None)
            .await
    }

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError> {
        let body = Self::encode(update)?;
        self.call(Method::PUT, endpoints::PROFILE, Some(access_token), Some(&body))
            .await
    }

    async fn change_password(
        &self,
        access_token: &str,
        request: &ChangePasswordRequest,
    ) -> Result<(), ApiError> {
        let body = Self::encode(request)?;
        self.send(
            Method::POST,
            endpoints::CHANGE_PASSWORD,
            Some(access_token),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_account(&self, access_token: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, endpoints::ACCOUNT, Some(access_token), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = HttpAuthBackend::new("https://api.example.com/v1/").unwrap();
        assert_eq!(backend.base_url(), "https://api.example.com/v1");
    }
}
