use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub match_retry_backoff_secs: u64,
    pub match_ttl_secs: u64,
    pub credential_path: PathBuf,
    pub login_email: Option<String>,
    pub login_password: Option<String>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            api_base_url: require_env("API_BASE_URL")?,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 10)?,
            match_retry_backoff_secs: parse_env("MATCH_RETRY_BACKOFF_SECS", 5)?,
            match_ttl_secs: parse_env("MATCH_TTL_SECS", 300)?,
            credential_path: std::env::var("CREDENTIAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".jobmatch/credential.json")),
            login_email: std::env::var("LOGIN_EMAIL").ok(),
            login_password: std::env::var("LOGIN_PASSWORD").ok(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            match_retry_backoff: Duration::from_secs(self.match_retry_backoff_secs),
            match_ttl: Duration::from_secs(self.match_ttl_secs),
        }
    }
}

/// Timing knobs consumed by the stores.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Bounded wait applied to every outbound call.
    pub request_timeout: Duration,
    /// How long a failed match fetch is served as errored before it is retried.
    pub match_retry_backoff: Duration,
    /// Age after which a match record is revalidated in the background.
    pub match_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            match_retry_backoff: Duration::from_secs(5),
            match_ttl: Duration::from_secs(300),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds")),
        Err(_) => Ok(default),
    }
}
