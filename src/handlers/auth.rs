use crate::error::ApiError;
use crate::middleware::BearerToken;
use crate::router::ProxyState;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

const MISSING_CREDENTIALS: &str = "Email and password required";

#[derive(Debug, Default, Deserialize)]
struct CredentialsBody {
    email: Option<String>,
    password: Option<String>,
}

/// Parse `{email, password}` leniently: an absent or malformed body is the
/// same validation failure as an empty field.
fn credentials(body: &Bytes) -> Result<(String, String), ApiError> {
    let parsed: CredentialsBody = serde_json::from_slice(body).unwrap_or_default();
    match (parsed.email, parsed.password) {
        (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
            Ok((email, password))
        }
        _ => Err(ApiError::bad_request(MISSING_CREDENTIALS)),
    }
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /login -> `{user, session}` as issued by the identity provider.
pub async fn login(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let (email, password) = credentials(&body)?;
    let session = state
        .identity
        .sign_in_with_password(&email, &password)
        .await
        .map_err(|e| ApiError::rejected_as(e, StatusCode::UNAUTHORIZED))?;

    let user = session.get("user").cloned().unwrap_or(Value::Null);
    info!(email = %email, "proxy login succeeded");
    Ok(Json(json!({ "user": user, "session": session })))
}

/// POST /signup -> `{user, message}`.
pub async fn signup(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let (email, password) = credentials(&body)?;
    let created = state
        .identity
        .sign_up(&email, &password)
        .await
        .map_err(|e| ApiError::rejected_as(e, StatusCode::BAD_REQUEST))?;

    // A session-bearing response nests the user; a pending confirmation is the user itself.
    let user = match created.get("user") {
        Some(user) => user.clone(),
        None => created,
    };
    info!(email = %email, "proxy signup succeeded");
    Ok(Json(json!({
        "user": user,
        "message": "Check your email to confirm signup",
    })))
}

/// GET /me -> `{user}` for the bearer token.
pub async fn me(
    State(state): State<ProxyState>,
    token: BearerToken,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .identity
        .get_user(token.as_str())
        .await
        .map_err(|e| match ApiError::rejected_as(e, StatusCode::UNAUTHORIZED) {
            rejected if rejected.status == StatusCode::UNAUTHORIZED => {
                ApiError::unauthorized("Invalid token")
            }
            other => other,
        })?;
    Ok(Json(json!({ "user": user })))
}

/// POST /logout. Tokens are stateless here; nothing is invalidated server-side.
pub async fn logout() -> impl IntoResponse {
    Json(json!({ "message": "Logged out successfully" }))
}
