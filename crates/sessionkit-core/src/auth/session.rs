//! Session state machine.
//!
//! `SessionManager` is the single writer of `SessionState`. It recovers
//! the stored session at startup (renewing or discarding an expiring
//! token), runs login/register/logout, and publishes every change on a
//! watch channel for front-ends to observe.
//!
//! Only one session-mutating operation runs at a time: while one is in
//! flight (`is_processing`), the others return `SessionError::Busy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::tokens::{TokenService, DEFAULT_RENEWAL_BUFFER_SECS};
use super::SessionError;
use crate::api::{
    AuthBackend, AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest,
};
use crate::models::{ProfileUpdate, SessionState, TokenPair, User};
use crate::store::{SecureStore, StoreError, StoreKey};

pub struct SessionManager {
    store: Arc<dyn SecureStore>,
    tokens: TokenService,
    backend: Arc<dyn AuthBackend>,
    renewal_buffer: Duration,
    state: watch::Sender<SessionState>,
    processing: AtomicBool,
}

/// Holds the processing flag; releases it on every exit path, including
/// the operation's future being dropped.
struct ProcessingGuard<'a> {
    manager: &'a SessionManager,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.manager.processing.store(false, Ordering::SeqCst);
        self.manager
            .state
            .send_modify(|state| state.is_processing = false);
    }
}

fn require(value: &str, what: &'static str) -> Result<(), SessionError> {
    if value.trim().is_empty() {
        return Err(SessionError::InvalidInput(what));
    }
    Ok(())
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SecureStore>,
        tokens: TokenService,
        backend: Arc<dyn AuthBackend>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            store,
            tokens,
            backend,
            renewal_buffer: Duration::seconds(DEFAULT_RENEWAL_BUFFER_SECS),
            state,
            processing: AtomicBool::new(false),
        }
    }

    pub fn with_renewal_buffer(mut self, buffer: Duration) -> Self {
        self.renewal_buffer = buffer;
        self
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn renewal_buffer(&self) -> Duration {
        self.renewal_buffer
    }

    fn begin(&self) -> Result<ProcessingGuard<'_>, SessionError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Rejected session operation while another is in flight");
            return Err(SessionError::Busy);
        }
        self.state.send_modify(|state| state.is_processing = true);
        Ok(ProcessingGuard { manager: self })
    }

    fn set_user(&self, user: Option<User>) {
        self.state.send_modify(|state| state.user = user);
    }

    fn require_user(&self) -> Result<User, SessionError> {
        self.current_user().ok_or(SessionError::NotAuthenticated)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Load the stored session. Never fails: anything that prevents
    /// restoring a usable session ends in the anonymous state.
    pub async fn initialize(&self) -> SessionState {
        if !self.state.borrow().is_loading {
            return self.state();
        }
        let guard = match self.begin() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Startup recovery skipped: another operation is in flight");
                return self.state();
            }
        };

        let user = self.recover().await;
        self.state.send_modify(|state| {
            state.user = user;
            state.is_loading = false;
        });
        drop(guard);

        self.state()
    }

    async fn recover(&self) -> Option<User> {
        let user = match self.load_stored_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("No stored session");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Stored session unreadable, signing out");
                self.discard_stored_session().await;
                return None;
            }
        };

        if !self.tokens.is_expiring_soon(self.renewal_buffer).await {
            info!(user_id = %user.id, "Restored stored session");
            return Some(user);
        }

        debug!(user_id = %user.id, "Stored token expiring soon, renewing");
        match self.tokens.refresh().await {
            Ok(_) => {
                info!(user_id = %user.id, "Restored stored session with renewed token");
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "Token renewal failed, signing out");
                self.discard_stored_session().await;
                None
            }
        }
    }

    async fn load_stored_user(&self) -> Result<Option<User>, StoreError> {
        let Some(raw) = self.store.get(StoreKey::User).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupted {
                key: StoreKey::User,
                reason: e.to_string(),
            })
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let json = serde_json::to_string(user).map_err(|e| StoreError::Corrupted {
            key: StoreKey::User,
            reason: e.to_string(),
        })?;
        self.store.set(StoreKey::User, &json).await
    }

    async fn discard_stored_session(&self) {
        if let Err(e) = self.tokens.clear().await {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    // =========================================================================
    // Sign in / sign out
    // =========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let _guard = self.begin()?;
        let email = email.trim();
        require(email, "email")?;
        require(password, "password")?;

        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.backend.login(&request).await.map_err(|e| {
            warn!(error = %e, "Login failed");
            SessionError::from_credentials_exchange(e)
        })?;

        let user = self.establish(response).await?;
        info!(user_id = %user.id, "Login successful");
        Ok(user)
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<User, SessionError> {
        let _guard = self.begin()?;
        let email = email.trim();
        let name = name.trim();
        require(email, "email")?;
        require(password, "password")?;
        require(name, "name")?;

        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        };
        let response = self.backend.register(&request).await.map_err(|e| {
            warn!(error = %e, "Registration failed");
            SessionError::from_credentials_exchange(e)
        })?;

        let user = self.establish(response).await?;
        info!(user_id = %user.id, "Registration successful");
        Ok(user)
    }

    /// Persist a fresh exchange (tokens first, then the user) and enter the
    /// authenticated state. A half-written session is cleared again.
    async fn establish(&self, response: AuthResponse) -> Result<User, SessionError> {
        let (user, grant) = response.into_parts();
        let pair = self.tokens.issue(grant, Utc::now())?;

        let persisted = match self.tokens.persist(&pair).await {
            Ok(()) => self.save_user(&user).await.map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            error!(error = %e, "Failed to persist session");
            self.discard_stored_session().await;
            return Err(e);
        }

        self.set_user(Some(user.clone()));
        Ok(user)
    }

    /// Sign out locally. The server is notified first on a best-effort
    /// basis. The in-memory user is cleared even when clearing the store
    /// fails; that failure is still returned.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _guard = self.begin()?;
        self.notify_logout().await;
        self.end_session().await?;
        info!("Logged out");
        Ok(())
    }

    async fn notify_logout(&self) {
        match self.tokens.access_token().await {
            Ok(Some(token)) => {
                if let Err(e) = self.backend.logout(&token).await {
                    warn!(error = %e, "Failed to notify server of logout");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read access token for logout"),
        }
    }

    async fn end_session(&self) -> Result<(), SessionError> {
        let cleared = self.tokens.clear().await;
        self.set_user(None);
        cleared.map_err(|e| {
            error!(error = %e, "Failed to clear stored session");
            e.into()
        })
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Renew the token pair now. On failure the session is left as it was.
    pub async fn refresh_session(&self) -> Result<TokenPair, SessionError> {
        self.require_user()?;
        let _guard = self.begin()?;
        Ok(self.tokens.refresh().await?)
    }

    /// Access token for an outgoing request, renewed first if it is about
    /// to expire. Safe to call from many tasks at once: renewals are
    /// serialized by the token service.
    pub async fn access_token(&self) -> Result<String, SessionError> {
        self.require_user()?;
        if self.tokens.is_expiring_soon(self.renewal_buffer).await {
            let pair = self.tokens.refresh().await?;
            return Ok(pair.access_token().to_string());
        }
        self.tokens
            .access_token()
            .await?
            .ok_or(SessionError::NotAuthenticated)
    }

    // =========================================================================
    // Profile
    // =========================================================================

    pub async fn reload_profile(&self) -> Result<User, SessionError> {
        self.require_user()?;
        let _guard = self.begin()?;
        let token = self.access_token().await?;
        let user = self.backend.fetch_profile(&token).await?;
        self.replace_user(user).await
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SessionError> {
        self.require_user()?;
        let _guard = self.begin()?;
        if update.is_empty() {
            return Err(SessionError::InvalidInput("a profile field"));
        }
        if let Some(ref name) = update.name {
            require(name, "name")?;
        }

        let token = self.access_token().await?;
        let user = self.backend.update_profile(&token, &update).await?;
        let user = self.replace_user(user).await?;
        info!(user_id = %user.id, "Profile updated");
        Ok(user)
    }

    async fn replace_user(&self, user: User) -> Result<User, SessionError> {
        self.save_user(&user).await?;
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        self.require_user()?;
        let _guard = self.begin()?;
        require(current_password, "current password")?;
        require(new_password, "new password")?;

        let token = self.access_token().await?;
        let request = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.backend.change_password(&token, &request).await?;
        info!("Password changed");
        Ok(())
    }

    /// Delete the account remotely, then sign out locally
    pub async fn delete_account(&self) -> Result<(), SessionError> {
        self.require_user()?;
        let _guard = self.begin()?;
        let token = self.access_token().await?;
        self.backend.delete_account(&token).await?;
        self.end_session().await?;
        info!("Account deleted");
        Ok(())
    }
}
