use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

use crate::types::AuthPhase;

/// Postgres `unique_violation`, surfaced by the REST layer on duplicate inserts.
const PG_UNIQUE_VIOLATION: &str = "23505";
/// Postgres `insufficient_privilege`, surfaced when a row-level policy rejects a write.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

#[derive(Debug, ThisError)]
pub enum TempoError {
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("{0}")]
    Validation(String),

    #[error("identity provider error ({status}): {message}")]
    Provider {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("No tokens in callback URL")]
    MissingCallbackTokens,

    #[error("OAuth sign-in was denied: {0}")]
    OAuthDenied(String),

    #[error("OAuth sign-in timed out")]
    OAuthTimedOut,

    #[error("No user logged in")]
    NotAuthenticated,

    #[error("operation not allowed while {0:?}")]
    InvalidTransition(AuthPhase),

    #[error("authentication attempt was superseded")]
    Superseded,

    #[error("profile row exists but is not visible yet")]
    ProfileNotVisible,

    #[error("Ractor error: {0}")]
    Actor(String),
}

impl From<figment::Error> for TempoError {
    fn from(e: figment::Error) -> Self {
        TempoError::Config(Box::new(e))
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TempoError {
    fn is_retryable(&self) -> bool {
        match self {
            TempoError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TempoError::Timeout(_) => true,
            TempoError::Provider { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

impl TempoError {
    /// Build a provider error from a non-2xx response body.
    pub fn from_provider_body(status: StatusCode, body: &[u8]) -> Self {
        let parsed: ProviderErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let message = parsed
            .msg
            .or(parsed.error_description)
            .or(parsed.message)
            .or(parsed.error)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("provider error")
                    .to_string()
            });
        let code = match parsed.code {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => parsed.error_code,
        };
        TempoError::Provider {
            status,
            code,
            message,
        }
    }

    /// The provider refused the request itself (bad credentials, bad token, duplicate user).
    pub fn is_rejection(&self) -> bool {
        matches!(self, TempoError::Provider { status, .. } if status.is_client_error())
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            TempoError::Provider { status, code, .. } => {
                *status == StatusCode::CONFLICT || code.as_deref() == Some(PG_UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }

    /// Row-level security has not caught up with the freshly issued token yet.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            TempoError::Provider { status, code, .. } => {
                *status == StatusCode::UNAUTHORIZED
                    || *status == StatusCode::FORBIDDEN
                    || code.as_deref() == Some(PG_INSUFFICIENT_PRIVILEGE)
            }
            TempoError::ProfileNotVisible => true,
            _ => false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
    code: Option<Value>,
}

/// HTTP-facing error of the proxy: `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    /// Map an error on a route whose provider rejections surface as `rejection`.
    pub fn rejected_as(err: TempoError, rejection: StatusCode) -> Self {
        match err {
            TempoError::Validation(message) => Self::bad_request(message),
            TempoError::Provider {
                status, message, ..
            } if status.is_client_error() => Self::new(rejection, message),
            other => {
                error!(error = %other, "unexpected proxy failure");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
