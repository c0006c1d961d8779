use backon::ExponentialBuilder;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

/// Process-wide configuration, loaded once from defaults + `TEMPO_*` env vars.
pub static CONFIG: LazyLock<Config> =
    LazyLock::new(|| Config::load().expect("FATAL: invalid TEMPO_* configuration"));

/// Key under which the serialized session record is persisted.
pub const SESSION_STORAGE_KEY: &str = "tempo_auth_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity_url: Url,
    pub identity_anon_key: String,
    pub listen_addr: String,
    pub loglevel: String,
    pub database_url: String,
    pub proxy: Option<Url>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,

    pub oauth_provider: String,
    pub oauth_redirect_url: String,
    pub oauth_poll_interval_ms: u64,
    pub oauth_poll_max_attempts: u32,

    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_max_times: usize,

    pub sign_out_timeout_ms: u64,
    pub session_lifetime_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_url: Url::parse("http://127.0.0.1:54321").expect("static default url"),
            identity_anon_key: String::new(),
            listen_addr: "0.0.0.0:3000".to_string(),
            loglevel: "info".to_string(),
            database_url: "sqlite:tempo-session.sqlite".to_string(),
            proxy: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 15,
            oauth_provider: "google".to_string(),
            oauth_redirect_url: "tempo://auth/callback".to_string(),
            oauth_poll_interval_ms: 500,
            oauth_poll_max_attempts: 60,
            retry_min_delay_ms: 250,
            retry_max_delay_ms: 2000,
            retry_max_times: 5,
            sign_out_timeout_ms: 5000,
            session_lifetime_secs: 3600,
        }
    }
}

impl Config {
    /// Defaults, overridden by `TEMPO_*` environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("TEMPO_"))
            .extract()
    }

    pub fn retry(&self) -> RetrySettings {
        RetrySettings {
            min_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_times: self.retry_max_times,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            oauth_provider: self.oauth_provider.clone(),
            redirect_url: self.oauth_redirect_url.clone(),
            poll_interval: Duration::from_millis(self.oauth_poll_interval_ms),
            poll_max_attempts: self.oauth_poll_max_attempts,
            profile_retry: self.retry(),
            sign_out_timeout: Duration::from_millis(self.sign_out_timeout_ms),
        }
    }
}

/// Backoff parameters shared by provider calls and profile resolution.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_times: usize,
}

impl RetrySettings {
    pub fn policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

/// Tunables for the client-side session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub oauth_provider: String,
    pub redirect_url: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub profile_retry: RetrySettings,
    pub sign_out_timeout: Duration,
}
