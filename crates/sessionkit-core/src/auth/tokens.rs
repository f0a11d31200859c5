//! Token issuance, persistence and renewal.
//!
//! The `TokenService` holds no session state of its own: every read and
//! write goes through the secure store. Renewal is serialized so that two
//! callers never race writes to the token entries.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::TokenError;
use crate::api::{ApiError, AuthBackend, TokenGrant};
use crate::models::token::{decode_expiry, encode_expiry, expires_within};
use crate::models::TokenPair;
use crate::store::{SecureStore, StoreError, StoreKey};

/// Renew this long before the access token expires (5 minutes)
pub const DEFAULT_RENEWAL_BUFFER_SECS: i64 = 5 * 60;

/// Token lifetime assumed when an exchange does not declare one (1 hour)
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn SecureStore>,
    backend: Arc<dyn AuthBackend>,
    default_ttl: Duration,
    refresh_lock: Arc<Mutex<()>>,
}

impl TokenService {
    pub fn new(store: Arc<dyn SecureStore>, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            store,
            backend,
            default_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Build a pair from a just-completed exchange. A negative or
    /// out-of-range `expires_in` is rejected as an invalid response.
    pub fn issue(&self, grant: TokenGrant, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        let ttl = match grant.expires_in {
            None => self.default_ttl,
            Some(secs) if secs < 0 => return Err(invalid_lifetime(secs)),
            Some(secs) => Duration::try_seconds(secs).ok_or_else(|| invalid_lifetime(secs))?,
        };
        TokenPair::issued(grant.access_token, grant.refresh_token, now, ttl)
            .ok_or_else(|| invalid_lifetime(ttl.num_seconds()))
    }

    /// Write access token, refresh token and expiry as three entries
    pub async fn persist(&self, pair: &TokenPair) -> Result<(), TokenError> {
        self.store
            .set(StoreKey::AccessToken, pair.access_token())
            .await?;
        self.store
            .set(StoreKey::RefreshToken, pair.refresh_token())
            .await?;
        self.store
            .set(StoreKey::ExpiresAt, &encode_expiry(pair.expires_at()))
            .await?;
        debug!(expires_at = %pair.expires_at(), "Persisted token pair");
        Ok(())
    }

    pub async fn expires_at(&self) -> Result<Option<DateTime<Utc>>, TokenError> {
        match self.store.get(StoreKey::ExpiresAt).await? {
            None => Ok(None),
            Some(raw) => decode_expiry(&raw).map(Some).ok_or_else(|| {
                StoreError::Corrupted {
                    key: StoreKey::ExpiresAt,
                    reason: "not an epoch-millisecond integer".to_string(),
                }
                .into()
            }),
        }
    }

    /// Whether the stored access token expires within `buffer`.
    ///
    /// No stored expiry counts as "not expiring". Unreadable or unparsable
    /// expiries are logged and count the same way.
    pub async fn is_expiring_soon(&self, buffer: Duration) -> bool {
        self.is_expiring_soon_at(buffer, Utc::now()).await
    }

    pub async fn is_expiring_soon_at(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at().await {
            Ok(Some(expires_at)) => expires_within(expires_at, now, buffer),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to check token expiry");
                false
            }
        }
    }

    pub async fn access_token(&self) -> Result<Option<String>, TokenError> {
        Ok(self.store.get(StoreKey::AccessToken).await?)
    }

    /// The stored pair, if all three entries are present
    pub async fn stored_pair(&self) -> Result<Option<TokenPair>, TokenError> {
        let access = self.store.get(StoreKey::AccessToken).await?;
        let refresh = self.store.get(StoreKey::RefreshToken).await?;
        let expires_at = self.expires_at().await?;
        Ok(match (access, refresh, expires_at) {
            (Some(access), Some(refresh), Some(expires_at)) => {
                Some(TokenPair::new(access, refresh, expires_at))
            }
            _ => None,
        })
    }

    /// Exchange the stored refresh token for a new pair and persist it.
    ///
    /// Concurrent callers are serialized. A caller that waited while
    /// another one rotated the tokens gets the rotated pair back without a
    /// second exchange.
    pub async fn refresh(&self) -> Result<TokenPair, TokenError> {
        let observed = self.store.get(StoreKey::RefreshToken).await?;
        let _guard = self.refresh_lock.lock().await;

        let current = self
            .store
            .get(StoreKey::RefreshToken)
            .await?
            .ok_or(TokenError::NoRefreshToken)?;

        if observed.as_deref() != Some(current.as_str()) {
            if let Some(pair) = self.stored_pair().await? {
                debug!("Tokens rotated by a concurrent refresh, reusing");
                return Ok(pair);
            }
        }

        let grant = self.backend.refresh(&current).await?;
        let pair = self.issue(grant, Utc::now())?;

        // Only replace the pair this exchange was based on
        match self.store.get(StoreKey::RefreshToken).await? {
            Some(stored) if stored == current => {}
            Some(_) => {
                debug!("Tokens replaced during refresh, discarding exchange result");
                return self.stored_pair().await?.ok_or(TokenError::NoRefreshToken);
            }
            None => {
                debug!("Session cleared during refresh, discarding exchange result");
                return Err(TokenError::NoRefreshToken);
            }
        }
        self.persist(&pair).await?;

        info!(expires_at = %pair.expires_at(), "Token renewed");
        Ok(pair)
    }

    /// Delete all four entries. Every key is attempted; the first failure
    /// is returned. Waits for an in-flight refresh so it cannot write the
    /// pair back afterwards.
    pub async fn clear(&self) -> Result<(), TokenError> {
        let _guard = self.refresh_lock.lock().await;
        let mut first_error = None;
        for key in StoreKey::ALL {
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "Failed to delete stored entry");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn invalid_lifetime(secs: i64) -> TokenError {
    ApiError::InvalidResponse(format!("token lifetime out of range: {}s", secs)).into()
}
