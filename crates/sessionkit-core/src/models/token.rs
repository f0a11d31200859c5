use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Access/refresh token pair with an absolute expiry.
///
/// `expires_at` is kept at millisecond precision, the resolution it is
/// persisted with, so a stored pair reads back identical.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: truncate_to_millis(expires_at),
        }
    }

    /// Pair issued at `issued_at` that lives for `ttl`. `None` when the
    /// expiry falls outside the representable date range.
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Self> {
        let expires_at = issued_at.checked_add_signed(ttl)?;
        Some(Self::new(access_token, refresh_token, expires_at))
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// True iff the time left before `expires_at` is strictly less than
/// `buffer`. Exactly `buffer` remaining is not "expiring".
pub fn expires_within(expires_at: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
    expires_at - now < buffer
}

/// Encode an expiry the way it is persisted: epoch milliseconds
pub fn encode_expiry(expires_at: DateTime<Utc>) -> String {
    expires_at.timestamp_millis().to_string()
}

/// Decode a persisted expiry. `None` for anything that is not a valid
/// epoch-millisecond integer.
pub fn decode_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_within_strict_boundary() {
        let now = Utc::now();
        let buffer = Duration::minutes(5);

        assert!(expires_within(now + Duration::seconds(10), now, buffer));
        assert!(!expires_within(now + buffer, now, buffer));
        assert!(expires_within(now + buffer - Duration::milliseconds(1), now, buffer));
        assert!(!expires_within(now + Duration::hours(1), now, buffer));
        // Already expired
        assert!(expires_within(now - Duration::minutes(1), now, buffer));
    }

    #[test]
    fn test_expiry_encoding_round_trip() {
        let pair = TokenPair::issued("a", "r", Utc::now(), Duration::seconds(3600)).unwrap();
        let decoded = decode_expiry(&encode_expiry(pair.expires_at()));
        assert_eq!(decoded, Some(pair.expires_at()));
    }

    #[test]
    fn test_decode_expiry_rejects_garbage() {
        assert_eq!(decode_expiry(""), None);
        assert_eq!(decode_expiry("soon"), None);
        assert_eq!(decode_expiry("12.5"), None);
        assert_eq!(
            decode_expiry("1700000000000").map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let pair =
            TokenPair::issued("access-secret", "refresh-secret", Utc::now(), Duration::hours(1))
                .unwrap();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[test]
    fn test_issued_rejects_out_of_range_expiry() {
        let now = Utc::now();
        assert!(TokenPair::issued("a", "r", now, Duration::MAX).is_none());
        assert!(TokenPair::issued("a", "r", now, Duration::MIN).is_none());
    }

    #[test]
    fn test_minutes_until_expiry() {
        let fresh = TokenPair::issued("a", "r", Utc::now(), Duration::minutes(30)).unwrap();
        assert!(fresh.minutes_until_expiry() >= 29);
        assert!(!fresh.is_expired());

        let stale = TokenPair::issued("a", "r", Utc::now(), Duration::minutes(-1)).unwrap();
        assert_eq!(stale.minutes_until_expiry(), 0);
        assert!(stale.is_expired());
    }
}
