use crate::config::SessionSettings;
use crate::error::TempoError;
use crate::identity::IdentityService;
use crate::service::deep_link::{OAuthCallback, parse_callback};
use crate::service::oauth_poll::{OAuthPoller, PollOutcome};
use crate::service::profile_sync::ProfileSync;
use crate::service::session_store::SessionStore;
use crate::types::{
    AuthPhase, AuthSnapshot, AuthUser, Established, Profile, ProfilePatch, ProfileState,
    SessionRecord, SignUpOutcome,
};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub type AttemptId = u64;

type SnapshotReply = RpcReplyPort<Result<AuthSnapshot, TempoError>>;

/// Email/password pair submitted by the user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Which channel delivered an attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionChannel {
    Password,
    SignUp,
    Restore,
    DeepLink,
    Poll,
}

/// Where the result of an attempt is reported back to.
#[derive(Debug)]
pub enum AttemptReply {
    Snapshot(SnapshotReply),
    SignUp(RpcReplyPort<Result<SignUpOutcome, TempoError>>),
    /// Nobody is waiting (poll completions).
    Detached,
}

impl AttemptReply {
    fn succeed(self, snapshot: AuthSnapshot) {
        match self {
            AttemptReply::Snapshot(port) => {
                let _ = port.send(Ok(snapshot));
            }
            AttemptReply::SignUp(port) => {
                let _ = port.send(Ok(SignUpOutcome::SignedIn(snapshot)));
            }
            AttemptReply::Detached => {}
        }
    }

    fn unconfirmed(self, user: AuthUser) {
        match self {
            AttemptReply::SignUp(port) => {
                let _ = port.send(Ok(SignUpOutcome::ConfirmationRequired(user)));
            }
            AttemptReply::Snapshot(port) => {
                let _ = port.send(Err(TempoError::NotAuthenticated));
            }
            AttemptReply::Detached => {}
        }
    }

    fn fail(self, err: TempoError) {
        match self {
            AttemptReply::Snapshot(port) => {
                let _ = port.send(Err(err));
            }
            AttemptReply::SignUp(port) => {
                let _ = port.send(Err(err));
            }
            AttemptReply::Detached => {}
        }
    }
}

/// Public messages handled by the session actor.
#[derive(Debug)]
pub enum SessionMessage {
    SignIn(Credentials, SnapshotReply),
    SignUp(Credentials, RpcReplyPort<Result<SignUpOutcome, TempoError>>),
    /// Silent restore from the persisted record at startup.
    Restore(SnapshotReply),
    /// Start a third-party sign-in; replies with the URL to open in the browser.
    BeginOAuth(RpcReplyPort<Result<Url, TempoError>>),
    DeepLink(String, SnapshotReply),
    SignOut(SnapshotReply),
    Refresh(SnapshotReply),
    UpdateProfile(ProfilePatch, SnapshotReply),
    CompleteProfile(ProfilePatch, SnapshotReply),
    MarkPreloaderSeen(RpcReplyPort<AuthSnapshot>),
    AccessToken(RpcReplyPort<Option<String>>),

    // Internal messages (sent by tasks the actor spawned)
    /// An authentication attempt produced a result on some channel.
    AttemptFinished {
        attempt: AttemptId,
        channel: CompletionChannel,
        result: Result<Established, TempoError>,
        reply: AttemptReply,
    },
    /// The OAuth poll ran out of attempts.
    OAuthTimedOut { attempt: AttemptId },
    /// Background profile resolution finished for the session with `epoch`.
    ProfileResolved { epoch: u64, profile: ProfileState },
}

/// Handle for interacting with the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    actor: ActorRef<SessionMessage>,
    snapshots: watch::Receiver<AuthSnapshot>,
}

impl SessionHandle {
    pub async fn sign_in(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthSnapshot, TempoError> {
        let creds = Credentials {
            email: email.into(),
            password: password.into(),
        };
        ractor::call!(self.actor, SessionMessage::SignIn, creds)
            .map_err(|e| TempoError::Actor(format!("SignIn RPC failed: {e}")))?
    }

    pub async fn sign_up(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<SignUpOutcome, TempoError> {
        let creds = Credentials {
            email: email.into(),
            password: password.into(),
        };
        ractor::call!(self.actor, SessionMessage::SignUp, creds)
            .map_err(|e| TempoError::Actor(format!("SignUp RPC failed: {e}")))?
    }

    pub async fn restore(&self) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::Restore)
            .map_err(|e| TempoError::Actor(format!("Restore RPC failed: {e}")))?
    }

    pub async fn begin_oauth(&self) -> Result<Url, TempoError> {
        ractor::call!(self.actor, SessionMessage::BeginOAuth)
            .map_err(|e| TempoError::Actor(format!("BeginOAuth RPC failed: {e}")))?
    }

    pub async fn handle_deep_link(&self, url: impl Into<String>) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::DeepLink, url.into())
            .map_err(|e| TempoError::Actor(format!("DeepLink RPC failed: {e}")))?
    }

    pub async fn sign_out(&self) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::SignOut)
            .map_err(|e| TempoError::Actor(format!("SignOut RPC failed: {e}")))?
    }

    pub async fn refresh(&self) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::Refresh)
            .map_err(|e| TempoError::Actor(format!("Refresh RPC failed: {e}")))?
    }

    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::UpdateProfile, patch)
            .map_err(|e| TempoError::Actor(format!("UpdateProfile RPC failed: {e}")))?
    }

    /// Final onboarding step: persists `patch` and marks the profile completed.
    pub async fn complete_profile(&self, patch: ProfilePatch) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::CompleteProfile, patch)
            .map_err(|e| TempoError::Actor(format!("CompleteProfile RPC failed: {e}")))?
    }

    pub async fn mark_preloader_seen(&self) -> Result<AuthSnapshot, TempoError> {
        ractor::call!(self.actor, SessionMessage::MarkPreloaderSeen)
            .map_err(|e| TempoError::Actor(format!("MarkPreloaderSeen RPC failed: {e}")))
    }

    pub async fn access_token(&self) -> Result<Option<String>, TempoError> {
        ractor::call!(self.actor, SessionMessage::AccessToken)
            .map_err(|e| TempoError::Actor(format!("AccessToken RPC failed: {e}")))
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshots.clone()
    }

    pub fn shutdown(&self) {
        self.actor.stop(None);
    }
}

enum AttemptKind {
    Password,
    Restore,
    OAuth,
}

struct Attempt {
    id: AttemptId,
    kind: AttemptKind,
    cancel: CancellationToken,
}

struct ActiveSession {
    record: SessionRecord,
    user: AuthUser,
    profile: ProfileState,
    epoch: u64,
    cancel: CancellationToken,
    /// Background profile resolution; `None` once it reported or a write superseded it.
    resolving: Option<CancellationToken>,
    /// Local edits the server has not acknowledged, replayed onto the resolved row.
    unsynced: Option<ProfilePatch>,
}

impl ActiveSession {
    /// A profile write landed. Whatever the resolution fetched earlier is older.
    fn settle_profile(&mut self, profile: Profile) {
        if let Some(task) = self.resolving.take() {
            task.cancel();
        }
        self.unsynced = None;
        self.profile = ProfileState::Loaded(profile);
    }

    fn accept_resolved(&mut self, mut profile: ProfileState) {
        self.resolving = None;
        if let (Some(patch), ProfileState::Loaded(p) | ProfileState::Placeholder(p)) =
            (self.unsynced.take(), &mut profile)
        {
            p.apply(&patch);
        }
        self.profile = profile;
    }
}

enum AuthState {
    Unauthenticated,
    Authenticating(Attempt),
    Authenticated(ActiveSession),
    SigningOut,
}

pub struct SessionActorArgs {
    pub identity: IdentityService,
    pub store: SessionStore,
    pub settings: SessionSettings,
    pub snapshot_tx: watch::Sender<AuthSnapshot>,
}

/// Internal state held by the ractor-driven session actor
struct SessionActorState {
    identity: IdentityService,
    store: SessionStore,
    settings: SessionSettings,
    auth: AuthState,
    last_error: Option<String>,
    next_id: u64,
    snapshot_tx: watch::Sender<AuthSnapshot>,
}

impl SessionActorState {
    fn phase(&self) -> AuthPhase {
        match &self.auth {
            AuthState::Unauthenticated => AuthPhase::Unauthenticated,
            AuthState::Authenticating(_) => AuthPhase::Authenticating,
            AuthState::Authenticated(s) => AuthPhase::for_profile(&s.profile),
            AuthState::SigningOut => AuthPhase::SigningOut,
        }
    }

    fn snapshot(&self) -> AuthSnapshot {
        let (user, profile) = match &self.auth {
            AuthState::Authenticated(s) => (Some(s.user.clone()), s.profile.clone()),
            _ => (None, ProfileState::Pending),
        };
        AuthSnapshot {
            phase: self.phase(),
            user,
            profile,
            error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Move into `Authenticating` with a fresh attempt; returns its id and token.
    fn begin_attempt(&mut self, kind: AttemptKind) -> (AttemptId, CancellationToken) {
        let id = self.next_id();
        let cancel = CancellationToken::new();
        self.auth = AuthState::Authenticating(Attempt {
            id,
            kind,
            cancel: cancel.clone(),
        });
        self.last_error = None;
        self.publish();
        (id, cancel)
    }

    fn oauth_attempt(&self) -> Option<AttemptId> {
        match &self.auth {
            AuthState::Authenticating(a) if matches!(a.kind, AttemptKind::OAuth) => Some(a.id),
            _ => None,
        }
    }

    fn is_current_attempt(&self, attempt: AttemptId) -> bool {
        matches!(&self.auth, AuthState::Authenticating(a) if a.id == attempt)
    }

    /// Leave `Authenticating`, cancelling whatever the attempt armed.
    fn end_attempt(&mut self) {
        if let AuthState::Authenticating(a) =
            std::mem::replace(&mut self.auth, AuthState::Unauthenticated)
        {
            a.cancel.cancel();
        }
    }
}

/// ractor-based session actor
struct SessionActor;

#[ractor::async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!("SessionActor started");
        let state = SessionActorState {
            identity: args.identity,
            store: args.store,
            settings: args.settings,
            auth: AuthState::Unauthenticated,
            last_error: None,
            next_id: 0,
            snapshot_tx: args.snapshot_tx,
        };
        state.publish();
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::SignIn(creds, reply) => {
                self.handle_password(state, &myself, creds, AttemptReply::Snapshot(reply));
            }
            SessionMessage::SignUp(creds, reply) => {
                self.handle_password(state, &myself, creds, AttemptReply::SignUp(reply));
            }
            SessionMessage::Restore(reply) => {
                self.handle_restore(state, &myself, reply).await;
            }
            SessionMessage::BeginOAuth(reply) => {
                self.handle_begin_oauth(state, &myself, reply).await;
            }
            SessionMessage::DeepLink(url, reply) => {
                self.handle_deep_link(state, &myself, url, reply);
            }
            SessionMessage::SignOut(reply) => {
                self.handle_sign_out(state, reply).await;
            }
            SessionMessage::Refresh(reply) => {
                let _ = reply.send(self.handle_refresh(state).await);
            }
            SessionMessage::UpdateProfile(patch, reply) => {
                let _ = reply.send(self.handle_save_profile(state, patch).await);
            }
            SessionMessage::CompleteProfile(patch, reply) => {
                let _ = reply.send(self.handle_save_profile(state, patch.completed()).await);
            }
            SessionMessage::MarkPreloaderSeen(reply) => {
                self.handle_mark_preloader_seen(state).await;
                let _ = reply.send(state.snapshot());
            }
            SessionMessage::AccessToken(reply) => {
                let token = match &state.auth {
                    AuthState::Authenticated(s) => Some(s.record.access_token.secret().clone()),
                    _ => None,
                };
                let _ = reply.send(token);
            }
            SessionMessage::AttemptFinished {
                attempt,
                channel,
                result,
                reply,
            } => {
                self.handle_attempt_finished(state, &myself, attempt, channel, result, reply)
                    .await;
            }
            SessionMessage::OAuthTimedOut { attempt } => {
                if state.is_current_attempt(attempt) {
                    warn!(attempt, "OAuth sign-in timed out");
                    state.end_attempt();
                    state.last_error = Some(TempoError::OAuthTimedOut.to_string());
                    state.publish();
                }
            }
            SessionMessage::ProfileResolved { epoch, profile } => {
                match &mut state.auth {
                    AuthState::Authenticated(s) if s.epoch == epoch && s.resolving.is_some() => {
                        s.accept_resolved(profile);
                        state.publish();
                    }
                    _ => debug!(epoch, "dropping stale profile result"),
                }
            }
        }
        Ok(())
    }
}

impl SessionActor {
    fn handle_password(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        creds: Credentials,
        reply: AttemptReply,
    ) {
        if !matches!(state.auth, AuthState::Unauthenticated) {
            reply.fail(TempoError::InvalidTransition(state.phase()));
            return;
        }
        let sign_up = matches!(reply, AttemptReply::SignUp(_));
        let (attempt, _cancel) = state.begin_attempt(AttemptKind::Password);
        info!(attempt, email = %creds.email, sign_up, "password authentication started");

        let identity = state.identity.clone();
        let me = myself.clone();
        tokio::spawn(async move {
            let (channel, result) = if sign_up {
                (
                    CompletionChannel::SignUp,
                    identity.sign_up_session(&creds.email, &creds.password).await,
                )
            } else {
                (
                    CompletionChannel::Password,
                    identity
                        .password_session(&creds.email, &creds.password)
                        .await,
                )
            };
            let _ = ractor::cast!(
                me,
                SessionMessage::AttemptFinished {
                    attempt,
                    channel,
                    result,
                    reply
                }
            );
        });
    }

    async fn handle_restore(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        reply: SnapshotReply,
    ) {
        if !matches!(state.auth, AuthState::Unauthenticated) {
            let _ = reply.send(Ok(state.snapshot()));
            return;
        }
        let record = match state.store.load().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("no stored session to restore");
                let _ = reply.send(Ok(state.snapshot()));
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stored session");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let (attempt, _cancel) = state.begin_attempt(AttemptKind::Restore);
        info!(attempt, user_id = %record.user_id, "restoring stored session");
        let identity = state.identity.clone();
        let me = myself.clone();
        tokio::spawn(async move {
            let result = identity.restore(record).await;
            let _ = ractor::cast!(
                me,
                SessionMessage::AttemptFinished {
                    attempt,
                    channel: CompletionChannel::Restore,
                    result,
                    reply: AttemptReply::Snapshot(reply)
                }
            );
        });
    }

    async fn handle_begin_oauth(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        reply: RpcReplyPort<Result<Url, TempoError>>,
    ) {
        match state.oauth_attempt() {
            None if matches!(state.auth, AuthState::Unauthenticated) => {}
            Some(previous) => {
                info!(attempt = previous, "restarting OAuth sign-in");
                state.end_attempt();
            }
            None => {
                let _ = reply.send(Err(TempoError::InvalidTransition(state.phase())));
                return;
            }
        }

        let url = match state
            .identity
            .authorize_url(&state.settings.oauth_provider, &state.settings.redirect_url)
        {
            Ok(url) => url,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Whatever is stored now predates the browser leg and must not complete it.
        let stale_token = match state.store.load().await {
            Ok(record) => record.map(|r| r.access_token.secret().clone()),
            Err(e) => {
                warn!(error = %e, "could not read stored session before OAuth sign-in");
                None
            }
        };

        let (attempt, cancel) = state.begin_attempt(AttemptKind::OAuth);
        info!(attempt, provider = %state.settings.oauth_provider, "OAuth sign-in started");

        let poller = OAuthPoller::new(
            state.store.clone(),
            state.identity.clone(),
            state.settings.poll_interval,
            state.settings.poll_max_attempts,
        )
        .ignoring(stale_token);
        let me = myself.clone();
        tokio::spawn(async move {
            match poller.run(&cancel).await {
                PollOutcome::Found(established) => {
                    let _ = ractor::cast!(
                        me,
                        SessionMessage::AttemptFinished {
                            attempt,
                            channel: CompletionChannel::Poll,
                            result: Ok(established),
                            reply: AttemptReply::Detached
                        }
                    );
                }
                PollOutcome::Exhausted => {
                    let _ = ractor::cast!(me, SessionMessage::OAuthTimedOut { attempt });
                }
                PollOutcome::Cancelled => {}
            }
        });

        let _ = reply.send(Ok(url));
    }

    fn handle_deep_link(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        url: String,
        reply: SnapshotReply,
    ) {
        if !url.starts_with(&state.settings.redirect_url) {
            debug!(%url, "deep link is not an auth callback");
            let _ = reply.send(Err(TempoError::Validation(
                "not an auth callback URL".to_string(),
            )));
            return;
        }

        let tokens = match parse_callback(&url) {
            OAuthCallback::Tokens(tokens) => tokens,
            OAuthCallback::Denied { error, description } => {
                let err = TempoError::OAuthDenied(description.unwrap_or(error));
                warn!(error = %err, "OAuth callback reported an error");
                if state.oauth_attempt().is_some() {
                    state.end_attempt();
                    state.last_error = Some(err.to_string());
                    state.publish();
                }
                let _ = reply.send(Err(err));
                return;
            }
            OAuthCallback::NoTokens => {
                warn!("OAuth callback carried no tokens");
                let _ = reply.send(Err(TempoError::MissingCallbackTokens));
                return;
            }
        };

        let attempt = match state.oauth_attempt() {
            Some(id) => id,
            // Cold start: the app was launched by the callback itself.
            None if matches!(state.auth, AuthState::Unauthenticated) => {
                state.begin_attempt(AttemptKind::OAuth).0
            }
            None => {
                debug!(phase = ?state.phase(), "ignoring OAuth callback outside an OAuth attempt");
                let _ = reply.send(Ok(state.snapshot()));
                return;
            }
        };

        let identity = state.identity.clone();
        let me = myself.clone();
        tokio::spawn(async move {
            let result = identity.exchange_callback(&tokens).await;
            let _ = ractor::cast!(
                me,
                SessionMessage::AttemptFinished {
                    attempt,
                    channel: CompletionChannel::DeepLink,
                    result,
                    reply: AttemptReply::Snapshot(reply)
                }
            );
        });
    }

    async fn handle_attempt_finished(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        attempt: AttemptId,
        channel: CompletionChannel,
        result: Result<Established, TempoError>,
        reply: AttemptReply,
    ) {
        if !state.is_current_attempt(attempt) {
            debug!(attempt, ?channel, "completion for an attempt that is no longer active; ignoring");
            match &state.auth {
                AuthState::Authenticated(_) => reply.succeed(state.snapshot()),
                _ => reply.fail(TempoError::Superseded),
            }
            return;
        }

        // First completion wins: this cancels the other channel (the poll).
        state.end_attempt();

        match result {
            Err(e) => {
                warn!(attempt, ?channel, error = %e, "authentication attempt failed");
                if channel == CompletionChannel::Restore {
                    if let Err(clear_err) = state.store.clear().await {
                        error!(error = %clear_err, "failed to clear unusable stored session");
                    }
                }
                state.last_error = Some(e.to_string());
                state.publish();
                reply.fail(e);
            }
            Ok(Established::Unconfirmed(user)) => {
                state.last_error = None;
                state.publish();
                reply.unconfirmed(user);
            }
            Ok(Established::Session { record, user }) => {
                if let Err(e) = state.store.save(&record).await {
                    error!(attempt, error = %e, "failed to persist session");
                    state.last_error = Some(e.to_string());
                    state.publish();
                    reply.fail(e);
                    return;
                }
                info!(attempt, ?channel, user_id = %user.id, "authenticated");
                self.enter_authenticated(state, myself, record, user);
                reply.succeed(state.snapshot());
            }
        }
    }

    /// Every entry into an authenticated state gets its own epoch and a
    /// background profile resolution bound to it.
    fn enter_authenticated(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        record: SessionRecord,
        user: AuthUser,
    ) {
        let epoch = state.next_id();
        let cancel = CancellationToken::new();
        let resolving = cancel.child_token();

        let sync = ProfileSync::new(state.identity.clone(), state.settings.profile_retry);
        let user_id = user.id.clone();
        let access_token = record.access_token.secret().clone();
        let task_cancel = resolving.clone();
        let me = myself.clone();
        tokio::spawn(async move {
            if let Some(profile) = sync.resolve(&user_id, &access_token, &task_cancel).await {
                let _ = ractor::cast!(me, SessionMessage::ProfileResolved { epoch, profile });
            }
        });

        state.auth = AuthState::Authenticated(ActiveSession {
            record,
            user,
            profile: ProfileState::Pending,
            epoch,
            cancel,
            resolving: Some(resolving),
            unsynced: None,
        });
        state.last_error = None;
        state.publish();
    }

    async fn handle_sign_out(&self, state: &mut SessionActorState, reply: SnapshotReply) {
        let previous = std::mem::replace(&mut state.auth, AuthState::SigningOut);
        state.publish();

        let access_token = match previous {
            AuthState::Authenticated(session) => {
                session.cancel.cancel();
                Some(session.record.access_token.secret().clone())
            }
            AuthState::Authenticating(attempt) => {
                attempt.cancel.cancel();
                None
            }
            AuthState::Unauthenticated | AuthState::SigningOut => None,
        };

        if let Some(token) = access_token {
            match tokio::time::timeout(
                state.settings.sign_out_timeout,
                state.identity.sign_out(&token),
            )
            .await
            {
                Ok(Ok(())) => info!("remote sign-out succeeded"),
                Ok(Err(e)) => warn!(error = %e, "remote sign-out failed; clearing local session anyway"),
                Err(_) => warn!("remote sign-out timed out; clearing local session anyway"),
            }
        }

        let cleared = state.store.clear().await;
        state.auth = AuthState::Unauthenticated;
        state.last_error = cleared.as_ref().err().map(|e| e.to_string());
        state.publish();
        let _ = reply.send(cleared.map(|()| state.snapshot()));
    }

    async fn handle_refresh(&self, state: &mut SessionActorState) -> Result<AuthSnapshot, TempoError> {
        let AuthState::Authenticated(session) = &mut state.auth else {
            return Err(TempoError::NotAuthenticated);
        };
        let refreshed = state
            .identity
            .refresh(session.record.refresh_token.secret())
            .await?;
        let Established::Session { record, user } = refreshed else {
            return Err(TempoError::NotAuthenticated);
        };
        state.store.save(&record).await?;
        info!(user_id = %user.id, "session refreshed");
        session.record = record;
        session.user = user;
        state.publish();
        Ok(state.snapshot())
    }

    async fn handle_save_profile(
        &self,
        state: &mut SessionActorState,
        patch: ProfilePatch,
    ) -> Result<AuthSnapshot, TempoError> {
        let AuthState::Authenticated(session) = &mut state.auth else {
            return Err(TempoError::NotAuthenticated);
        };
        let saved = state
            .identity
            .save_profile(session.record.access_token.secret(), &session.user.id, &patch)
            .await;
        match saved {
            Ok(profile) => {
                info!(user_id = %session.user.id, completed = profile.profile_completed, "profile saved");
                session.settle_profile(profile);
                state.last_error = None;
                state.publish();
                Ok(state.snapshot())
            }
            Err(e) => {
                warn!(user_id = %session.user.id, error = %e, "profile update failed");
                state.last_error = Some(e.to_string());
                state.publish();
                Err(e)
            }
        }
    }

    /// Best effort: the local flag flips even when the remote write fails.
    async fn handle_mark_preloader_seen(&self, state: &mut SessionActorState) {
        let AuthState::Authenticated(session) = &mut state.auth else {
            debug!("preloader seen without a session; ignoring");
            return;
        };
        let patch = ProfilePatch::preloader_seen();
        let saved = state
            .identity
            .save_profile(session.record.access_token.secret(), &session.user.id, &patch)
            .await;
        match saved {
            Ok(profile) => session.settle_profile(profile),
            Err(e) => {
                warn!(user_id = %session.user.id, error = %e, "failed to record preloader as seen");
                match &mut session.profile {
                    ProfileState::Loaded(p) | ProfileState::Placeholder(p) => p.apply(&patch),
                    ProfileState::Pending => session.unsynced = Some(patch),
                    ProfileState::Failed(_) => {}
                }
            }
        }
        state.publish();
    }
}

/// Spawn the session actor and return a handle.
pub async fn spawn(
    identity: IdentityService,
    store: SessionStore,
    settings: SessionSettings,
) -> Result<SessionHandle, TempoError> {
    let (snapshot_tx, snapshots) = watch::channel(AuthSnapshot::unauthenticated());
    let args = SessionActorArgs {
        identity,
        store,
        settings,
        snapshot_tx,
    };
    let (actor, _jh) = Actor::spawn(None, SessionActor, args)
        .await
        .map_err(|e| TempoError::Actor(format!("failed to spawn SessionActor: {e}")))?;
    Ok(SessionHandle { actor, snapshots })
}
