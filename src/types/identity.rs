use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User object as returned by the identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Token grant returned by the password, refresh and sign-up endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: ProviderUser,
}

/// Sign-up yields a full session, or only the user when email confirmation is pending.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenGrant),
    User(ProviderUser),
}

/// The signed-in user as seen by the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub user_metadata: Value,
}

impl From<ProviderUser> for AuthUser {
    fn from(u: ProviderUser) -> Self {
        Self {
            id: u.id,
            email: u.email.unwrap_or_default(),
            user_metadata: u.user_metadata,
        }
    }
}
