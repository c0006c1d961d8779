use chrono::{DateTime, Utc};
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::identity::{AuthUser, TokenGrant};

/// The persisted session: token pair, expiry and the identity it belongs to.
///
/// Expiry is kept at whole-second precision so that a store/reload round-trip
/// is lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub email: String,
}

impl SessionRecord {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        user_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            access_token: AccessToken::new(access_token.into()),
            refresh_token: RefreshToken::new(refresh_token.into()),
            expires_at: truncate_to_seconds(expires_at),
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    pub fn from_grant(grant: &TokenGrant, fallback_lifetime: Duration) -> Self {
        Self::new(
            grant.access_token.clone(),
            grant.refresh_token.clone(),
            resolve_expiry(grant.expires_at, grant.expires_in, fallback_lifetime),
            grant.user.id.clone(),
            grant.user.email.clone().unwrap_or_default(),
        )
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Absolute expiry wins, then relative lifetime, then the configured fallback.
pub fn resolve_expiry(
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    fallback_lifetime: Duration,
) -> DateTime<Utc> {
    let now = Utc::now().timestamp();
    let secs = expires_at
        .or_else(|| expires_in.map(|d| now + d))
        .unwrap_or_else(|| now + fallback_lifetime.as_secs() as i64);
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// Result of a successful exchange with the identity provider.
#[derive(Debug, Clone)]
pub enum Established {
    Session {
        record: SessionRecord,
        user: AuthUser,
    },
    /// Account created, but no session until the email is confirmed.
    Unconfirmed(AuthUser),
}
