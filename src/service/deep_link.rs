//! Parsing of the OAuth deep-link callback
//! (`tempo://auth/callback#access_token=…&refresh_token=…`).

use std::collections::HashMap;

/// Tokens carried in the callback fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthCallback {
    Tokens(CallbackTokens),
    /// The provider redirected back with `error=…` instead of tokens.
    Denied {
        error: String,
        description: Option<String>,
    },
    NoTokens,
}

/// Parse the fragment of a callback URL. Never fails: a URL without a usable
/// fragment is reported as [`OAuthCallback::NoTokens`].
pub fn parse_callback(url: &str) -> OAuthCallback {
    let Some((_, fragment)) = url.split_once('#') else {
        return OAuthCallback::NoTokens;
    };
    let mut params = fragment_pairs(fragment);

    if let Some(error) = params.remove("error") {
        return OAuthCallback::Denied {
            error,
            description: params.remove("error_description"),
        };
    }

    match (
        params.remove("access_token"),
        params.remove("refresh_token"),
    ) {
        (Some(access_token), Some(refresh_token)) => OAuthCallback::Tokens(CallbackTokens {
            access_token,
            refresh_token,
            expires_at: params.get("expires_at").and_then(|v| v.parse().ok()),
            expires_in: params.get("expires_in").and_then(|v| v.parse().ok()),
            token_type: params.remove("token_type"),
        }),
        _ => OAuthCallback::NoTokens,
    }
}

/// Split `k=v&k=v`, percent-decoding both sides and skipping empty keys or values.
fn fragment_pairs(fragment: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(fragment.as_bytes())
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
