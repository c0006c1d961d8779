use base64::Engine;
use serde::Deserialize;

/// Unverified claims read from an access token issued by the identity provider.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the payload segment of a JWT without checking its signature.
///
/// The provider validates the token on every call; the claims are only used to
/// learn the expiry of tokens that arrive through a deep link.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload_b64 = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &serde_json::Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.sig",
        engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        engine.encode(claims.to_string())
    )
}
