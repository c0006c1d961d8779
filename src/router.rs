use crate::handlers::auth::{health, login, logout, me, signup};
use crate::identity::IdentityService;

use axum::{
    Router,
    routing::{get, post},
};

/// Shared state for the auth proxy.
#[derive(Clone)]
pub struct ProxyState {
    pub identity: IdentityService,
}

impl ProxyState {
    pub fn new(identity: IdentityService) -> Self {
        Self { identity }
    }
}

pub fn proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/signup", post(signup))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .with_state(state)
}
