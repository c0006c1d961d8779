use crate::error::TempoError;
use crate::types::{NewProfile, Profile, ProfilePatch};

use oauth2::{AuthUrl, RedirectUrl};
use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

const APIKEY_HEADER: &str = "apikey";
const PREFER_REPRESENTATION: &str = "return=representation";
const PROFILES_TABLE: &str = "profiles";

/// Raw calls against the hosted identity/database service. No retries here.
pub(super) struct IdentityEndpoints {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
}

impl IdentityEndpoints {
    pub(super) fn new(http: reqwest::Client, base: Url, anon_key: String) -> Self {
        Self {
            http,
            base: with_trailing_slash(base),
            anon_key,
        }
    }

    fn auth_url(&self, path: &str) -> Result<Url, TempoError> {
        Ok(self.base.join(&format!("auth/v1/{path}"))?)
    }

    fn rest_url(&self, table: &str) -> Result<Url, TempoError> {
        Ok(self.base.join(&format!("rest/v1/{table}"))?)
    }

    pub(super) async fn password_grant(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Value, TempoError> {
        let mut url = self.auth_url("token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = self
            .http
            .post(url)
            .header(APIKEY_HEADER, &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        read_json(resp).await
    }

    pub(super) async fn refresh_grant(&self, refresh_token: &str) -> Result<Value, TempoError> {
        let mut url = self.auth_url("token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let resp = self
            .http
            .post(url)
            .header(APIKEY_HEADER, &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        read_json(resp).await
    }

    pub(super) async fn sign_up(&self, email: &str, password: &str) -> Result<Value, TempoError> {
        let resp = self
            .http
            .post(self.auth_url("signup")?)
            .header(APIKEY_HEADER, &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        read_json(resp).await
    }

    pub(super) async fn get_user(&self, access_token: &str) -> Result<Value, TempoError> {
        let resp = self
            .http
            .get(self.auth_url("user")?)
            .header(APIKEY_HEADER, &self.anon_key)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(access_token)
            .send()
            .await?;
        read_json(resp).await
    }

    pub(super) async fn sign_out(&self, access_token: &str) -> Result<(), TempoError> {
        let resp = self
            .http
            .post(self.auth_url("logout")?)
            .header(APIKEY_HEADER, &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await?;
            return Err(TempoError::from_provider_body(status, &body));
        }
        Ok(())
    }

    /// URL the system browser is sent to for a third-party sign-in.
    pub(super) fn authorize_url(
        &self,
        provider: &str,
        redirect: &RedirectUrl,
    ) -> Result<AuthUrl, TempoError> {
        let mut url = self.auth_url("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect.as_str());
        Ok(AuthUrl::from_url(url))
    }

    pub(super) async fn fetch_profile(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<Profile>, TempoError> {
        let mut url = self.rest_url(PROFILES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{user_id}"));
        let resp = self
            .http
            .get(url)
            .header(APIKEY_HEADER, &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let rows: Vec<Profile> = read_json(resp).await?;
        debug!(user_id, rows = rows.len(), "profiles query returned");
        Ok(rows.into_iter().next())
    }

    pub(super) async fn insert_profile(
        &self,
        access_token: &str,
        profile: &NewProfile,
    ) -> Result<Profile, TempoError> {
        let resp = self
            .http
            .post(self.rest_url(PROFILES_TABLE)?)
            .header(APIKEY_HEADER, &self.anon_key)
            .header("Prefer", PREFER_REPRESENTATION)
            .bearer_auth(access_token)
            .json(profile)
            .send()
            .await?;
        let rows: Vec<Profile> = read_json(resp).await?;
        // An insert that returns nothing means the row exists but RLS hides it from us.
        rows.into_iter().next().ok_or(TempoError::ProfileNotVisible)
    }

    pub(super) async fn update_profile(
        &self,
        access_token: &str,
        user_id: &str,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>, TempoError> {
        let mut url = self.rest_url(PROFILES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{user_id}"));
        let resp = self
            .http
            .patch(url)
            .header(APIKEY_HEADER, &self.anon_key)
            .header("Prefer", PREFER_REPRESENTATION)
            .bearer_auth(access_token)
            .json(patch)
            .send()
            .await?;
        let rows: Vec<Profile> = read_json(resp).await?;
        Ok(rows.into_iter().next())
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TempoError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(TempoError::from_provider_body(status, &body));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
