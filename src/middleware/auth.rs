use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use tracing::debug;

use crate::error::ApiError;

/// Bearer token taken from `Authorization: Bearer <token>`.
///
/// Rejects with 401 `No authorization header` when the header is absent and
/// 401 `Invalid token` when it is present but not a bearer credential.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await {
            Ok(TypedHeader(Authorization(bearer))) if !bearer.token().is_empty() => {
                Ok(Self(bearer.token().to_string()))
            }
            Ok(_) => Err(ApiError::unauthorized("Invalid token")),
            Err(rejection) if rejection.is_missing() => {
                Err(ApiError::unauthorized("No authorization header"))
            }
            Err(rejection) => {
                debug!(error = %rejection, "malformed authorization header");
                Err(ApiError::unauthorized("Invalid token"))
            }
        }
    }
}
