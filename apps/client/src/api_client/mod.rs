/// API Client: the HTTP implementation of every collaborator contract.
///
/// Stores never talk HTTP themselves; they hold the contracts as trait objects
/// and `ApiClient` is what the binary plugs in.
///
/// A read, retries included, stays within one request timeout: that is the
/// bound `SessionStore::guard` puts around every contract call.
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ClientError;

pub mod dto;
mod services;

/// Reads are tried this many times in total; mutations once.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No answer within {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    /// Worth another attempt for an idempotent read.
    fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            ApiError::Api { status, .. } => *status == 429 || *status >= 500,
            ApiError::Parse(_) | ApiError::Timeout(_) => false,
        }
    }
}

impl From<ApiError> for ClientError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Api { status: 401, .. } => ClientError::SessionExpired,
            ApiError::Api { status: 404, message } => ClientError::NotFound(message),
            ApiError::Api { status: 409, message } => ClientError::Conflict(message),
            ApiError::Api {
                status: 400 | 422,
                message,
            } => ClientError::Validation(message),
            ApiError::Api { status, message } => {
                ClientError::Remote(format!("status {status}: {message}"))
            }
            ApiError::Http(e) => ClientError::Remote(e.to_string()),
            ApiError::Parse(e) => ClientError::Remote(format!("unexpected response: {e}")),
            ApiError::Timeout(after) => ClientError::Timeout(after),
        }
    }
}

/// HTTP client for the job-matching backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    /// Budget of one call, retries included.
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends an idempotent read, retrying 429, 5xx and connection failures
    /// with exponential backoff (1s, 2s) while the call's budget lasts.
    async fn read<T, F>(&self, path: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(delay) = retry_delay(attempt, remaining) else {
                    warn!("{path} attempt {attempt} failed, no time left to retry");
                    break;
                };
                warn!(
                    "{path} attempt {attempt} failed, retrying after {}ms...",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let request = execute(build(&self.client, self.url(path)));
            match tokio::time::timeout_at(deadline, request).await {
                Ok(Ok(body)) => return decode(&body),
                Ok(Err(e)) if e.is_transient() => last_error = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ApiError::Timeout(self.timeout)),
            }
        }

        Err(last_error.unwrap_or(ApiError::Api {
            status: 503,
            message: format!("{path} gave up after {MAX_ATTEMPTS} attempts"),
        }))
    }

    /// Sends a mutating request exactly once.
    async fn write(&self, path: &str, request: RequestBuilder) -> Result<String, ApiError> {
        let body = execute(request).await?;
        debug!("{path} succeeded");
        Ok(body)
    }
}

/// Backoff before retry `attempt`, unless it would use up the rest of the budget.
fn retry_delay(attempt: u32, remaining: Duration) -> Option<Duration> {
    let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
    (delay < remaining).then_some(delay)
}

async fn execute(request: RequestBuilder) -> Result<String, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }
    if status.is_server_error() || status.as_u16() == 429 {
        warn!("Backend returned {status}: {body}");
    }
    Err(ApiError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    Ok(serde_json::from_str(body)?)
}

/// FastAPI-style `{"detail": ...}` bodies; anything else is passed through.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<dto::ErrorBody>(body) {
        Ok(dto::ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(dto::ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, message: &str) -> ApiError {
        ApiError::Api {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ClientError::from(api(401, "")), ClientError::SessionExpired));
        assert!(matches!(ClientError::from(api(404, "gone")), ClientError::NotFound(m) if m == "gone"));
        for status in [400, 422] {
            assert!(matches!(ClientError::from(api(status, "bad")), ClientError::Validation(_)));
        }
        assert!(matches!(
            ClientError::from(api(409, "Interaction already exists")),
            ClientError::Conflict(_)
        ));
        assert!(ClientError::from(api(502, "bad gateway")).is_retryable());
    }

    #[test]
    fn test_only_rate_limits_and_server_errors_are_retried() {
        assert!(api(429, "").is_transient());
        assert!(api(503, "").is_transient());
        assert!(!api(401, "").is_transient());
        assert!(!api(404, "").is_transient());
    }

    #[test]
    fn test_retries_fit_in_the_call_budget() {
        assert_eq!(retry_delay(1, Duration::from_secs(10)), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(2, Duration::from_secs(10)), Some(Duration::from_secs(2)));
        // a slow first attempt leaves no room for the backoff
        assert_eq!(retry_delay(1, Duration::from_millis(800)), None);
        assert_eq!(retry_delay(2, Duration::from_secs(2)), None);
    }

    #[test]
    fn test_budget_timeout_maps_to_client_timeout() {
        let err = ClientError::from(ApiError::Timeout(Duration::from_secs(10)));
        assert!(matches!(err, ClientError::Timeout(after) if after == Duration::from_secs(10)));
    }

    #[test]
    fn test_error_message_reads_detail() {
        assert_eq!(
            error_message(r#"{"detail": "Invalid email or password"}"#),
            "Invalid email or password"
        );
        assert!(error_message(r#"{"detail": [{"loc": ["body", "email"]}]}"#).contains("email"));
        assert_eq!(error_message("Internal Server Error"), "Internal Server Error");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/auth/me"), "http://localhost:8000/auth/me");
    }
}
