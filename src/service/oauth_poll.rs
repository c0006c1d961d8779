use crate::identity::IdentityService;
use crate::service::session_store::SessionStore;
use crate::types::Established;

use futures::StreamExt;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum PollOutcome {
    Found(Established),
    Exhausted,
    Cancelled,
}

/// Watches for a session to appear after the browser leg of an OAuth sign-in.
///
/// Each tick reads the session store (the callback may have been handled by a
/// different process) and confirms a found record with the identity provider.
/// A record whose access token equals `stale_token` was already stored when
/// the attempt began and never completes it.
pub struct OAuthPoller {
    store: SessionStore,
    identity: IdentityService,
    interval: Duration,
    max_attempts: u32,
    stale_token: Option<String>,
}

impl OAuthPoller {
    pub fn new(
        store: SessionStore,
        identity: IdentityService,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            identity,
            interval,
            max_attempts,
            stale_token: None,
        }
    }

    /// Ignore the record holding `access_token`.
    pub fn ignoring(mut self, access_token: Option<String>) -> Self {
        self.stale_token = access_token;
        self
    }

    pub async fn run(self, cancel: &CancellationToken) -> PollOutcome {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval)
            .take(self.max_attempts as usize)
            .enumerate();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("OAuth poll cancelled");
                    return PollOutcome::Cancelled;
                }
                tick = ticks.next() => {
                    let Some((attempt, _)) = tick else {
                        info!(attempts = self.max_attempts, "OAuth poll exhausted");
                        return PollOutcome::Exhausted;
                    };
                    if let Some(found) = self.check_store().await {
                        info!(attempt = attempt + 1, "OAuth poll observed a session");
                        return PollOutcome::Found(found);
                    }
                    debug!(attempt = attempt + 1, "OAuth poll: no session yet");
                }
            }
        }
    }

    async fn check_store(&self) -> Option<Established> {
        let record = match self.store.load().await {
            Ok(Some(record))
                if self.stale_token.as_deref() == Some(record.access_token.secret().as_str()) =>
            {
                return None;
            }
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "OAuth poll could not read the session store");
                return None;
            }
        };
        match self.identity.user(record.access_token.secret()).await {
            Ok(user) => Some(Established::Session { record, user }),
            Err(e) => {
                debug!(error = %e, "stored session not accepted yet");
                None
            }
        }
    }
}
