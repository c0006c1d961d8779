use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use std::time::Duration;
use tempo_auth::config::Config;
use tempo_auth::service::{SessionHandle, SessionStore};
use tempo_auth::types::{
    AuthPhase, AuthSnapshot, ProfilePatch, ProfileState, SessionRecord, SignUpOutcome,
};
use tempo_auth::{IdentityService, TempoError};
use url::Url;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn config_for(server: &MockServer) -> Config {
    let mut cfg = Config::default();
    cfg.identity_url = Url::parse(&server.uri()).expect("mock server uri");
    cfg.identity_anon_key = "anon-key".to_string();
    cfg.retry_min_delay_ms = 5;
    cfg.retry_max_delay_ms = 20;
    cfg.retry_max_times = 2;
    cfg.oauth_poll_interval_ms = 20;
    cfg.oauth_poll_max_attempts = 5;
    cfg.sign_out_timeout_ms = 500;
    cfg
}

async fn spawn_with(cfg: &Config, store: SessionStore) -> SessionHandle {
    let identity = IdentityService::new(cfg).expect("identity service");
    tempo_auth::service::spawn(identity, store, cfg.session_settings())
        .await
        .expect("spawn session actor")
}

async fn memory_store() -> SessionStore {
    SessionStore::open("sqlite::memory:")
        .await
        .expect("in-memory store")
}

async fn wait_for(
    handle: &SessionHandle,
    pred: impl FnMut(&AuthSnapshot) -> bool,
) -> AuthSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for auth state")
        .expect("session actor went away");
    snapshot.clone()
}

fn grant(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": { "id": "u-1", "email": "golfer@example.com" }
    })
}

fn profile_row(completed: bool) -> Value {
    json!({
        "id": "p-1",
        "user_id": "u-1",
        "handicap": 12.4,
        "unit_preference": "imperial",
        "profile_completed": completed,
        "has_seen_preloader": false
    })
}

async fn mount_user(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "u-1", "email": "golfer@example.com" })),
        )
        .mount(server)
        .await;
}

async fn mount_existing_profile(server: &MockServer, completed: bool) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("user_id", "eq.u-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile_row(completed)])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn sign_in_persists_exact_tokens_and_loads_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .expect(1)
        .mount(&server)
        .await;
    mount_existing_profile(&server, false).await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;

    let signed_in = handle
        .sign_in("golfer@example.com", "hunter2")
        .await
        .expect("sign in");
    assert!(signed_in.phase.is_authenticated());
    assert_eq!(signed_in.user.as_ref().map(|u| u.id.as_str()), Some("u-1"));

    let record = store.load().await.unwrap().expect("session persisted");
    assert_eq!(record.access_token.secret(), "access-1");
    assert_eq!(record.refresh_token.secret(), "refresh-1");
    assert_eq!(record.user_id, "u-1");
    assert_eq!(handle.access_token().await.unwrap().as_deref(), Some("access-1"));

    let snapshot = wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;
    assert!(matches!(snapshot.profile, ProfileState::Loaded(ref p) if p.handicap == Some(12.4)));
    handle.shutdown();
}

#[tokio::test]
async fn rejected_credentials_leave_no_partial_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;

    let err = handle
        .sign_in("golfer@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(err.is_rejection(), "got {err:?}");

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(
        snapshot
            .error
            .as_deref()
            .is_some_and(|e| e.contains("Invalid login credentials"))
    );
    assert!(snapshot.user.is_none());
    assert!(store.load().await.unwrap().is_none());
    handle.shutdown();
}

#[tokio::test]
async fn sign_up_without_session_requires_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "u-9", "email": "new@example.com" })),
        )
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;

    let outcome = handle
        .sign_up("new@example.com", "hunter22")
        .await
        .expect("sign up");
    let SignUpOutcome::ConfirmationRequired(user) = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert_eq!(user.id, "u-9");
    assert_eq!(handle.snapshot().phase, AuthPhase::Unauthenticated);
    assert!(store.load().await.unwrap().is_none());
    handle.shutdown();
}

#[tokio::test]
async fn sign_out_clears_store_even_when_remote_logout_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    mount_existing_profile(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;

    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| s.phase == AuthPhase::AuthenticatedComplete).await;

    let after = handle.sign_out().await.expect("local sign-out succeeds");
    assert_eq!(after.phase, AuthPhase::Unauthenticated);
    assert!(store.load().await.unwrap().is_none());
    assert_eq!(handle.access_token().await.unwrap(), None);

    // Idempotent: signing out again is harmless.
    let again = handle.sign_out().await.unwrap();
    assert_eq!(again.phase, AuthPhase::Unauthenticated);
    handle.shutdown();
}

#[tokio::test]
async fn sign_out_is_bounded_when_remote_logout_hangs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    mount_existing_profile(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();

    let after = tokio::time::timeout(Duration::from_secs(2), handle.sign_out())
        .await
        .expect("sign-out must not wait for the remote call")
        .unwrap();
    assert_eq!(after.phase, AuthPhase::Unauthenticated);
    assert!(store.load().await.unwrap().is_none());
    handle.shutdown();
}

#[tokio::test]
async fn restore_with_rejected_refresh_token_clears_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "error_code": "refresh_token_not_found",
            "msg": "Invalid Refresh Token: Refresh Token Not Found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("session.sqlite").display());
    let expired = SessionRecord::new(
        "old-access",
        "old-refresh",
        Utc::now() - ChronoDuration::minutes(5),
        "u-1",
        "golfer@example.com",
    );
    SessionStore::open(&url).await.unwrap().save(&expired).await.unwrap();

    let cfg = config_for(&server);
    let store = SessionStore::open(&url).await.unwrap();
    let handle = spawn_with(&cfg, store.clone()).await;

    let err = handle.restore().await.unwrap_err();
    assert!(err.is_rejection(), "got {err:?}");
    assert_eq!(handle.snapshot().phase, AuthPhase::Unauthenticated);
    assert!(store.load().await.unwrap().is_none());
    assert!(
        SessionStore::open(&url).await.unwrap().load().await.unwrap().is_none(),
        "durable copy must be gone too"
    );
    handle.shutdown();
}

#[tokio::test]
async fn restore_refreshes_a_rejected_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "invalid JWT" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("fresh", "fresh-refresh")))
        .expect(1)
        .mount(&server)
        .await;
    mount_existing_profile(&server, true).await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let stale = SessionRecord::new(
        "revoked",
        "still-good",
        Utc::now() + ChronoDuration::minutes(30),
        "u-1",
        "golfer@example.com",
    );
    store.save(&stale).await.unwrap();
    let handle = spawn_with(&cfg, store.clone()).await;

    let restored = handle.restore().await.expect("restore");
    assert!(restored.phase.is_authenticated());
    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.access_token.secret(), "fresh");
    assert_eq!(record.refresh_token.secret(), "fresh-refresh");
    handle.shutdown();
}

#[tokio::test]
async fn restore_without_record_stays_unauthenticated() {
    let server = MockServer::start().await;
    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;

    let snapshot = handle.restore().await.unwrap();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.error.is_none());
    handle.shutdown();
}

#[tokio::test]
async fn deep_link_and_poll_racing_create_one_profile() {
    let server = MockServer::start().await;
    mount_user(&server, "oauth-access").await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([profile_row(false)])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("session.sqlite").display());
    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, SessionStore::open(&url).await.unwrap()).await;

    let authorize = handle.begin_oauth().await.expect("begin oauth");
    assert_eq!(authorize.path(), "/auth/v1/authorize");
    assert!(
        authorize
            .query_pairs()
            .any(|(k, v)| k == "redirect_to" && v == "tempo://auth/callback")
    );
    assert_eq!(handle.snapshot().phase, AuthPhase::Authenticating);

    // An out-of-process callback handler stores the session the poll will see...
    let callback_store = SessionStore::open(&url).await.unwrap();
    callback_store
        .save(&SessionRecord::new(
            "oauth-access",
            "oauth-refresh",
            Utc::now() + ChronoDuration::hours(1),
            "u-1",
            "golfer@example.com",
        ))
        .await
        .unwrap();
    // ...while the deep link delivers the same tokens to the app.
    let via_link = handle
        .handle_deep_link(
            "tempo://auth/callback#access_token=oauth-access&refresh_token=oauth-refresh&expires_in=3600&token_type=bearer",
        )
        .await
        .expect("deep link");
    assert!(via_link.phase.is_authenticated());

    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;
    // Give a losing channel time to (wrongly) start a second resolution.
    tokio::time::sleep(Duration::from_millis(150)).await;
    server.verify().await;
    handle.shutdown();
}

#[tokio::test]
async fn poll_completes_oauth_from_an_externally_stored_session() {
    let server = MockServer::start().await;
    mount_user(&server, "external-access").await;
    mount_existing_profile(&server, true).await;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("session.sqlite").display());
    let mut cfg = config_for(&server);
    cfg.oauth_poll_max_attempts = 50;
    let handle = spawn_with(&cfg, SessionStore::open(&url).await.unwrap()).await;

    handle.begin_oauth().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    SessionStore::open(&url)
        .await
        .unwrap()
        .save(&SessionRecord::new(
            "external-access",
            "external-refresh",
            Utc::now() + ChronoDuration::hours(1),
            "u-1",
            "golfer@example.com",
        ))
        .await
        .unwrap();

    let snapshot = wait_for(&handle, |s| s.phase == AuthPhase::AuthenticatedComplete).await;
    assert_eq!(snapshot.user.map(|u| u.email).as_deref(), Some("golfer@example.com"));
    assert_eq!(
        handle.access_token().await.unwrap().as_deref(),
        Some("external-access")
    );
    handle.shutdown();
}

#[tokio::test]
async fn exhausted_poll_fails_the_attempt() {
    let server = MockServer::start().await;
    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;

    handle.begin_oauth().await.unwrap();
    let snapshot = wait_for(&handle, |s| {
        s.phase == AuthPhase::Unauthenticated && s.error.is_some()
    })
    .await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some(TempoError::OAuthTimedOut.to_string().as_str())
    );
    handle.shutdown();
}

#[tokio::test]
async fn deep_link_edge_cases() {
    let server = MockServer::start().await;
    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;

    let err = handle
        .handle_deep_link("tempo://auth/callback")
        .await
        .unwrap_err();
    assert!(matches!(err, TempoError::MissingCallbackTokens));
    assert_eq!(handle.snapshot().phase, AuthPhase::Unauthenticated);

    let err = handle
        .handle_deep_link("tempo://rounds/42#access_token=A&refresh_token=B")
        .await
        .unwrap_err();
    assert!(matches!(err, TempoError::Validation(_)));

    handle.begin_oauth().await.unwrap();
    let err = handle
        .handle_deep_link("tempo://auth/callback#error=access_denied&error_description=User+cancelled")
        .await
        .unwrap_err();
    assert!(matches!(err, TempoError::OAuthDenied(ref m) if m == "User cancelled"));
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.error.is_some());
    handle.shutdown();
}

#[tokio::test]
async fn placeholder_profile_when_row_stays_invisible() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "42501",
            "message": "permission denied for table profiles"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();

    let snapshot = wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;
    let ProfileState::Placeholder(profile) = snapshot.profile else {
        panic!("expected placeholder, got {:?}", snapshot.profile);
    };
    assert_eq!(profile.user_id, "u-1");
    assert!(!profile.profile_completed);
    handle.shutdown();
}

#[tokio::test]
async fn duplicate_insert_falls_back_to_existing_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile_row(true)])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"profiles_user_id_key\""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();

    let snapshot = wait_for(&handle, |s| s.phase == AuthPhase::AuthenticatedComplete).await;
    assert!(matches!(snapshot.profile, ProfileState::Loaded(_)));
    handle.shutdown();
}

#[tokio::test]
async fn profile_result_for_a_signed_out_session_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([profile_row(true)]))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    handle.sign_out().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert_eq!(snapshot.profile, ProfileState::Pending);
    handle.shutdown();
}

#[tokio::test]
async fn completing_onboarding_moves_to_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(&server)
        .await;
    mount_existing_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("user_id", "eq.u-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile_row(true)])))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;

    let patch = ProfilePatch {
        handicap: Some(12.4),
        ..ProfilePatch::default()
    };
    let snapshot = handle.complete_profile(patch).await.expect("complete profile");
    assert_eq!(snapshot.phase, AuthPhase::AuthenticatedComplete);
    handle.shutdown();
}

#[tokio::test]
async fn profile_updates_require_a_session() {
    let server = MockServer::start().await;
    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;

    let err = handle
        .update_profile(ProfilePatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TempoError::NotAuthenticated));
    let err = handle.refresh().await.unwrap_err();
    assert!(matches!(err, TempoError::NotAuthenticated));

    // Best effort: no session, no error.
    let snapshot = handle.mark_preloader_seen().await.unwrap();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    handle.shutdown();
}

async fn mount_password_grant(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-1", "refresh-1")))
        .mount(server)
        .await;
}

async fn mount_slow_profile(server: &MockServer, completed: bool) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([profile_row(completed)]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn saved_profile_is_not_overwritten_by_an_older_fetch() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_slow_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile_row(true)])))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    assert_eq!(handle.snapshot().phase, AuthPhase::AuthenticatedNoProfile);

    let saved = handle
        .complete_profile(ProfilePatch::default())
        .await
        .expect("complete profile");
    assert_eq!(saved.phase, AuthPhase::AuthenticatedComplete);

    // The fetch started at sign-in answers after the save.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::AuthenticatedComplete);
    assert!(snapshot.profile.is_complete());
    handle.shutdown();
}

#[tokio::test]
async fn preloader_flag_survives_failed_write_while_profile_pending() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_slow_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();

    let snapshot = handle.mark_preloader_seen().await.unwrap();
    assert_eq!(snapshot.profile, ProfileState::Pending);

    let snapshot = wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;
    let profile = snapshot.profile.profile().expect("resolved profile");
    assert!(profile.has_seen_preloader);
    handle.shutdown();
}

#[tokio::test]
async fn preloader_flag_flips_locally_when_remote_write_fails() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_existing_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(body_json(json!({ "has_seen_preloader": true })))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;

    let snapshot = handle.mark_preloader_seen().await.unwrap();
    let profile = snapshot.profile.profile().expect("loaded profile");
    assert!(profile.has_seen_preloader);
    assert!(matches!(snapshot.profile, ProfileState::Loaded(_)));
    handle.shutdown();
}

#[tokio::test]
async fn preloader_flag_uses_the_stored_row_on_success() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_existing_profile(&server, false).await;
    let mut seen = profile_row(false);
    seen["has_seen_preloader"] = json!(true);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([seen])))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;

    let snapshot = handle.mark_preloader_seen().await.unwrap();
    assert!(snapshot.profile.profile().is_some_and(|p| p.has_seen_preloader));
    assert!(snapshot.error.is_none());
    handle.shutdown();
}

#[tokio::test]
async fn refresh_rotates_and_persists_tokens() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_existing_profile(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("access-2", "refresh-2")))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let store = memory_store().await;
    let handle = spawn_with(&cfg, store.clone()).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| s.phase == AuthPhase::AuthenticatedComplete).await;

    let snapshot = handle.refresh().await.expect("refresh");
    assert_eq!(snapshot.phase, AuthPhase::AuthenticatedComplete);
    assert_eq!(handle.access_token().await.unwrap().as_deref(), Some("access-2"));

    let record = store.load().await.unwrap().expect("persisted");
    assert_eq!(record.access_token.secret(), "access-2");
    assert_eq!(record.refresh_token.secret(), "refresh-2");
    handle.shutdown();
}

#[tokio::test]
async fn profile_update_inserts_when_no_row_exists() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_existing_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(body_partial_json(json!({ "user_id": "u-1", "handicap": 8.5 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([profile_row(true)])))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;

    let patch = ProfilePatch {
        handicap: Some(8.5),
        ..ProfilePatch::default()
    };
    let snapshot = handle.update_profile(patch).await.expect("update profile");
    assert_eq!(snapshot.phase, AuthPhase::AuthenticatedComplete);
    handle.shutdown();
}

#[tokio::test]
async fn profile_update_retries_patch_after_insert_conflict() {
    let server = MockServer::start().await;
    mount_password_grant(&server).await;
    mount_existing_profile(&server, false).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile_row(true)])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"profiles_user_id_key\""
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, memory_store().await).await;
    handle.sign_in("golfer@example.com", "hunter2").await.unwrap();
    wait_for(&handle, |s| {
        s.phase == AuthPhase::AuthenticatedProfileIncomplete
    })
    .await;

    let snapshot = handle
        .update_profile(ProfilePatch {
            handicap: Some(8.5),
            ..ProfilePatch::default()
        })
        .await
        .expect("update profile");
    assert_eq!(snapshot.phase, AuthPhase::AuthenticatedComplete);
    handle.shutdown();
}

#[tokio::test]
async fn oauth_poll_ignores_a_session_stored_before_sign_in_began() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "u-old", "email": "previous@example.com" })),
        )
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store().await;
    store
        .save(&SessionRecord::new(
            "old-access",
            "old-refresh",
            Utc::now() + ChronoDuration::hours(1),
            "u-old",
            "previous@example.com",
        ))
        .await
        .unwrap();

    let cfg = config_for(&server);
    let handle = spawn_with(&cfg, store).await;
    handle.begin_oauth().await.unwrap();

    let snapshot = wait_for(&handle, |s| {
        s.phase == AuthPhase::Unauthenticated && s.error.is_some()
    })
    .await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some(TempoError::OAuthTimedOut.to_string().as_str())
    );
    assert!(snapshot.user.is_none());
    handle.shutdown();
}
