use super::endpoints::IdentityEndpoints;
use super::jwt::decode_claims;
use crate::config::{Config, RetrySettings};
use crate::error::{IsRetryable, TempoError};
use crate::service::deep_link::CallbackTokens;
use crate::types::{
    AuthUser, Established, NewProfile, Profile, ProfilePatch, ProviderUser, SessionRecord,
    SignUpResponse, TokenGrant,
};

use backon::Retryable;
use oauth2::RedirectUrl;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Client for the hosted identity/database service, shared by the proxy and
/// the session lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct IdentityService {
    endpoints: Arc<IdentityEndpoints>,
    retry: RetrySettings,
    session_lifetime: Duration,
}

impl IdentityService {
    /// Create a new service with a preconfigured HTTP client.
    pub fn new(cfg: &Config) -> Result<Self, TempoError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("tempo-auth/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs));
        if let Some(proxy_url) = cfg.proxy.as_ref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }
        let http = builder.build()?;

        Ok(Self {
            endpoints: Arc::new(IdentityEndpoints::new(
                http,
                cfg.identity_url.clone(),
                cfg.identity_anon_key.clone(),
            )),
            retry: cfg.retry(),
            session_lifetime: Duration::from_secs(cfg.session_lifetime_secs),
        })
    }

    /// Password grant, relayed verbatim by the proxy.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Value, TempoError> {
        (|| async { self.endpoints.password_grant(email, password).await })
            .retry(self.retry.policy())
            .when(|e: &TempoError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("password grant retrying after error {}, sleeping {:?}", err, dur);
            })
            .await
    }

    /// Account creation is not idempotent, so it is never retried.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Value, TempoError> {
        self.endpoints.sign_up(email, password).await
    }

    pub async fn get_user(&self, access_token: &str) -> Result<Value, TempoError> {
        (|| async { self.endpoints.get_user(access_token).await })
            .retry(self.retry.policy())
            .when(|e: &TempoError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("get user retrying after error {}, sleeping {:?}", err, dur);
            })
            .await
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), TempoError> {
        self.endpoints.sign_out(access_token).await
    }

    pub fn authorize_url(&self, provider: &str, redirect: &str) -> Result<Url, TempoError> {
        let redirect = RedirectUrl::new(redirect.to_string())?;
        Ok(self.endpoints.authorize_url(provider, &redirect)?.url().clone())
    }

    pub async fn user(&self, access_token: &str) -> Result<AuthUser, TempoError> {
        let raw = self.get_user(access_token).await?;
        let user: ProviderUser = serde_json::from_value(raw)?;
        Ok(user.into())
    }

    pub async fn password_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Established, TempoError> {
        let grant: TokenGrant =
            serde_json::from_value(self.sign_in_with_password(email, password).await?)?;
        info!(user_id = %grant.user.id, "password sign-in accepted");
        Ok(self.established(grant))
    }

    pub async fn sign_up_session(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Established, TempoError> {
        match serde_json::from_value(self.sign_up(email, password).await?)? {
            SignUpResponse::Session(grant) => {
                info!(user_id = %grant.user.id, "sign-up issued a session");
                Ok(self.established(grant))
            }
            SignUpResponse::User(user) => {
                info!(user_id = %user.id, "sign-up pending email confirmation");
                Ok(Established::Unconfirmed(user.into()))
            }
        }
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Established, TempoError> {
        let raw = (|| async { self.endpoints.refresh_grant(refresh_token).await })
            .retry(self.retry.policy())
            .when(|e: &TempoError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("token refresh retrying after error {}, sleeping {:?}", err, dur);
            })
            .await?;
        let grant: TokenGrant = serde_json::from_value(raw)?;
        Ok(self.established(grant))
    }

    /// Bring a persisted record back to life: validate it while unexpired,
    /// otherwise (or when the provider rejects it) exchange the refresh token.
    pub async fn restore(&self, record: SessionRecord) -> Result<Established, TempoError> {
        if !record.is_expired() {
            match self.user(record.access_token.secret()).await {
                Ok(user) => return Ok(Established::Session { record, user }),
                Err(e) if e.is_rejection() => {
                    debug!(user_id = %record.user_id, error = %e, "stored access token rejected; refreshing");
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(user_id = %record.user_id, "stored access token expired; refreshing");
        }
        self.refresh(record.refresh_token.secret()).await
    }

    /// Validate tokens delivered by the OAuth deep link and turn them into a session.
    pub async fn exchange_callback(
        &self,
        tokens: &CallbackTokens,
    ) -> Result<Established, TempoError> {
        let user = self.user(&tokens.access_token).await?;
        let expires_at = tokens
            .expires_at
            .or_else(|| decode_claims(&tokens.access_token).and_then(|c| c.exp));
        let record = SessionRecord::new(
            tokens.access_token.clone(),
            tokens.refresh_token.clone(),
            crate::types::session::resolve_expiry(
                expires_at,
                tokens.expires_in,
                self.session_lifetime,
            ),
            user.id.clone(),
            user.email.clone(),
        );
        Ok(Established::Session { record, user })
    }

    pub async fn fetch_profile(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<Profile>, TempoError> {
        self.endpoints.fetch_profile(access_token, user_id).await
    }

    pub async fn insert_profile(
        &self,
        access_token: &str,
        profile: &NewProfile,
    ) -> Result<Profile, TempoError> {
        self.endpoints.insert_profile(access_token, profile).await
    }

    /// Update the caller's profile row, creating it if it does not exist yet.
    pub async fn save_profile(
        &self,
        access_token: &str,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> Result<Profile, TempoError> {
        if let Some(updated) = self
            .endpoints
            .update_profile(access_token, user_id, patch)
            .await?
        {
            return Ok(updated);
        }
        debug!(user_id, "no profile row to update; inserting");
        match self
            .endpoints
            .insert_profile(access_token, &NewProfile::with_patch(user_id, patch))
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if e.is_conflict() => self
                .endpoints
                .update_profile(access_token, user_id, patch)
                .await?
                .ok_or(TempoError::ProfileNotVisible),
            Err(e) => Err(e),
        }
    }

    fn established(&self, grant: TokenGrant) -> Established {
        let record = SessionRecord::from_grant(&grant, self.session_lifetime);
        Established::Session {
            record,
            user: grant.user.into(),
        }
    }
}
