//! In-process `AuthBackend`.
//!
//! Keeps an account table and issues random rotating tokens, so the whole
//! session lifecycle can run without a server: unit tests drive it
//! directly and the CLI's `demo` backend uses it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::backend::AuthBackend;
use super::types::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, TokenGrant};
use super::ApiError;
use crate::models::{ProfileUpdate, User};

/// Lifetime of access tokens issued by the demo backend, in seconds
pub const DEMO_TOKEN_TTL_SECS: i64 = 3600;

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct BackendState {
    /// Keyed by lowercased email
    accounts: HashMap<String, Account>,
    /// token -> account key
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    next_id: u64,
}

impl BackendState {
    fn issue_tokens(&mut self, account_key: &str) -> (String, String) {
        let access = format!("at_{:016x}", rand::random::<u64>());
        let refresh = format!("rt_{:016x}", rand::random::<u64>());
        self.access_tokens
            .insert(access.clone(), account_key.to_string());
        self.refresh_tokens
            .insert(refresh.clone(), account_key.to_string());
        (access, refresh)
    }

    fn revoke_all(&mut self, account_key: &str) {
        self.access_tokens.retain(|_, key| key != account_key);
        self.refresh_tokens.retain(|_, key| key != account_key);
    }

    fn account_for(&mut self, access_token: &str) -> Result<&mut Account, ApiError> {
        let key = self
            .access_tokens
            .get(access_token)
            .cloned()
            .ok_or(ApiError::Unauthorized)?;
        self.accounts.get_mut(&key).ok_or(ApiError::Unauthorized)
    }
}

#[derive(Default)]
struct CallCounters {
    login: AtomicUsize,
    register: AtomicUsize,
    refresh: AtomicUsize,
    logout: AtomicUsize,
}

pub struct InMemoryAuthBackend {
    state: Mutex<BackendState>,
    token_ttl_secs: i64,
    latency: Duration,
    refresh_latency: Duration,
    offline: AtomicBool,
    reject_refresh: AtomicBool,
    calls: CallCounters,
}

impl Default for InMemoryAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuthBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            token_ttl_secs: DEMO_TOKEN_TTL_SECS,
            latency: Duration::ZERO,
            refresh_latency: Duration::ZERO,
            offline: AtomicBool::new(false),
            reject_refresh: AtomicBool::new(false),
            calls: CallCounters::default(),
        }
    }

    pub fn with_token_ttl(mut self, secs: i64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    /// Delay every exchange, mimicking a network round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay refresh responses only, after the tokens have been rotated
    pub fn with_refresh_latency(mut self, latency: Duration) -> Self {
        self.refresh_latency = latency;
        self
    }

    /// Seed an account
    pub fn with_account(self, email: &str, password: &str, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.next_id += 1;
            let user = User::new(state.next_id.to_string(), email, name);
            state.accounts.insert(
                email.to_lowercase(),
                Account {
                    user,
                    password: password.to_string(),
                },
            );
        }
        self
    }

    /// Fail every exchange as unreachable while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject every refresh token while set
    pub fn set_reject_refresh(&self, reject: bool) {
        self.reject_refresh.store(reject, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.calls.login.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.calls.register.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls.refresh.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.calls.logout.load(Ordering::SeqCst)
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.accounts.contains_key(&email.to_lowercase()))
            .unwrap_or(false)
    }

    async fn round_trip(&self) -> Result<(), ApiError> {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Unreachable("simulated network failure".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BackendState>, ApiError> {
        self.state
            .lock()
            .map_err(|_| ApiError::ServerError("backend state poisoned".to_string()))
    }
}

#[async_trait]
impl AuthBackend for InMemoryAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        self.calls.login.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let mut state = self.lock()?;
        let key = request.email.to_lowercase();
        let user = match state.accounts.get(&key) {
            Some(account) if account.password == request.password => account.user.clone(),
            _ => return Err(ApiError::Unauthorized),
        };
        let (access_token, refresh_token) = state.issue_tokens(&key);

        Ok(AuthResponse {
            user,
            access_token,
            refresh_token,
            expires_in: Some(self.token_ttl_secs),
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let mut state = self.lock()?;
        let key = request.email.to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(ApiError::Conflict("email already registered".to_string()));
        }

        state.next_id += 1;
        let now = Utc::now();
        let user = User {
            created_at: Some(now),
            updated_at: Some(now),
            ..User::new(state.next_id.to_string(), &request.email, &request.name)
        };
        state.accounts.insert(
            key.clone(),
            Account {
                user: user.clone(),
                password: request.password.clone(),
            },
        );
        let (access_token, refresh_token) = state.issue_tokens(&key);

        // Registration responses carry no lifetime; clients apply their default
        Ok(AuthResponse {
            user,
            access_token,
            refresh_token,
            expires_in: None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }

        let (access_token, refresh_token) = {
            let mut state = self.lock()?;
            let key = state
                .refresh_tokens
                .remove(refresh_token)
                .ok_or(ApiError::Unauthorized)?;
            state.revoke_all(&key);
            state.issue_tokens(&key)
        };

        // Rotation is already applied server-side while the response is slow
        if !self.refresh_latency.is_zero() {
            tokio::time::sleep(self.refresh_latency).await;
        }

        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_in: Some(self.token_ttl_secs),
        })
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        self.calls.logout.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let mut state = self.lock()?;
        let key = state
            .access_tokens
            .get(access_token)
            .cloned()
            .ok_or(ApiError::Unauthorized)?;
        state.revoke_all(&key);
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<User, ApiError> {
        self.round_trip().await?;
        let mut state = self.lock()?;
        Ok(state.account_for(access_token)?.user.clone())
    }

    async fn update_profile(
        &self,
        access_token: &str,
        update: &ProfileUpdate,
    ) -> Result<User, ApiError> {
        self.round_trip().await?;
        let mut state = self.lock()?;
        let account = state.account_for(access_token)?;
        if let Some(ref name) = update.name {
            account.user.name = name.clone();
        }
        if let Some(ref avatar) = update.avatar {
            account.user.avatar = Some(avatar.clone());
        }
        account.user.updated_at = Some(Utc::now());
        Ok(account.user.clone())
    }

    async fn change_password(
        &self,
        access_token: &str,
        request: &ChangePasswordRequest,
    ) -> Result<(), ApiError> {
        self.round_trip().await?;
        let mut state = self.lock()?;
        let account = state.account_for(access_token)?;
        if account.password != request.current_password {
            return Err(ApiError::AccessDenied("current password is incorrect".to_string()));
        }
        account.password = request.new_password.clone();
        Ok(())
    }

    async fn delete_account(&self, access_token: &str) -> Result<(), ApiError> {
        self.round_trip().await?;
        let mut state = self.lock()?;
        let key = state
            .access_tokens
            .get(access_token)
            .cloned()
            .ok_or(ApiError::Unauthorized)?;
        state.revoke_all(&key);
        state.accounts.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_checks_password() {
        let backend = InMemoryAuthBackend::new().with_account("a@b.com", "secret123", "A");

        let ok = backend.login(&login_request("A@B.com", "secret123")).await.unwrap();
        assert_eq!(ok.user.email, "a@b.com");
        assert_eq!(ok.expires_in, Some(DEMO_TOKEN_TTL_SECS));

        let err = backend.login(&login_request("a@b.com", "wrong")).await;
        assert!(matches!(err, Err(ApiError::Unauthorized)));
        assert_eq!(backend.login_calls(), 2);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let backend = InMemoryAuthBackend::new();
        let request = RegisterRequest {
            email: "new@b.com".to_string(),
            password: "secret123".to_string(),
            name: "New".to_string(),
        };
        let resp = backend.register(&request).await.unwrap();
        assert_eq!(resp.expires_in, None);
        assert!(resp.user.created_at.is_some());
        assert!(backend.has_account("new@b.com"));

        assert!(matches!(
            backend.register(&request).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_invalidates_old_token() {
        let backend = InMemoryAuthBackend::new().with_account("a@b.com", "pw", "A");
        let first = backend.login(&login_request("a@b.com", "pw")).await.unwrap();

        let grant = backend.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(grant.access_token, first.access_token);
        assert_ne!(grant.refresh_token, first.refresh_token);

        // Old refresh token and old access token are both dead
        assert!(backend.refresh(&first.refresh_token).await.is_err());
        assert!(backend.fetch_profile(&first.access_token).await.is_err());
        assert!(backend.fetch_profile(&grant.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let backend = InMemoryAuthBackend::new().with_account("a@b.com", "pw", "A");
        backend.set_offline(true);
        assert!(matches!(
            backend.login(&login_request("a@b.com", "pw")).await,
            Err(ApiError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password_and_delete_account() {
        let backend = InMemoryAuthBackend::new().with_account("a@b.com", "old-pw", "A");
        let session = backend.login(&login_request("a@b.com", "old-pw")).await.unwrap();

        let bad = ChangePasswordRequest {
            current_password: "nope".to_string(),
            new_password: "new-pw".to_string(),
        };
        assert!(matches!(
            backend.change_password(&session.access_token, &bad).await,
            Err(ApiError::AccessDenied(_))
        ));

        let good = ChangePasswordRequest {
            current_password: "old-pw".to_string(),
            new_password: "new-pw".to_string(),
        };
        backend.change_password(&session.access_token, &good).await.unwrap();
        assert!(backend.login(&login_request("a@b.com", "new-pw")).await.is_ok());

        let again = backend.login(&login_request("a@b.com", "new-pw")).await.unwrap();
        backend.delete_account(&again.access_token).await.unwrap();
        assert!(!backend.has_account("a@b.com"));
    }
}
