use crate::config::RetrySettings;
use crate::error::{IsRetryable, TempoError};
use crate::identity::IdentityService;
use crate::types::{NewProfile, Profile, ProfileState};

use backon::Retryable;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resolves the profile row for a freshly authenticated user.
///
/// Fetch-before-create keeps at most one row per user: a duplicate insert is
/// answered by fetching the row that won. The freshly issued token may not be
/// honoured by row-level security yet, so permission failures are retried with
/// backoff instead of waiting a fixed delay up front.
pub struct ProfileSync {
    identity: IdentityService,
    retry: RetrySettings,
}

impl ProfileSync {
    pub fn new(identity: IdentityService, retry: RetrySettings) -> Self {
        Self { identity, retry }
    }

    /// `None` when cancelled (the session that asked for it is gone).
    pub async fn resolve(
        &self,
        user_id: &str,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Option<ProfileState> {
        let attempt = (|| async { self.fetch_or_create(user_id, access_token).await })
            .retry(self.retry.policy())
            .when(should_retry)
            .notify(|err: &TempoError, dur: Duration| {
                warn!(user_id, error = %err, "profile not available yet; retrying in {:?}", dur);
            });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(user_id, "profile resolution cancelled");
                return None;
            }
            res = attempt => res,
        };

        Some(match outcome {
            Ok(profile) => ProfileState::Loaded(profile),
            Err(e) if should_retry(&e) => {
                warn!(user_id, error = %e, "profile unavailable after retries; using placeholder");
                ProfileState::Placeholder(Profile::placeholder(user_id))
            }
            Err(e) => {
                error!(user_id, error = %e, "profile resolution failed");
                ProfileState::Failed(e.to_string())
            }
        })
    }

    async fn fetch_or_create(&self, user_id: &str, access_token: &str) -> Result<Profile, TempoError> {
        if let Some(existing) = self.identity.fetch_profile(access_token, user_id).await? {
            debug!(user_id, "profile found");
            return Ok(existing);
        }

        match self
            .identity
            .insert_profile(access_token, &NewProfile::defaults(user_id))
            .await
        {
            Ok(created) => {
                info!(user_id, "profile created");
                Ok(created)
            }
            Err(e) if e.is_conflict() => {
                debug!(user_id, "profile row already exists; fetching it");
                self.identity
                    .fetch_profile(access_token, user_id)
                    .await?
                    .ok_or(TempoError::ProfileNotVisible)
            }
            Err(e) => Err(e),
        }
    }
}

fn should_retry(e: &TempoError) -> bool {
    e.is_permission_denied() || e.is_retryable()
}
