use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Client-level error type shared by every store in the core.
/// `notice()` maps each variant to what the presentation layer should show.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid credentials: {0}")]
    Auth(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Not signed in")]
    Anonymous,

    #[error("Session has not been initialized")]
    NotInitialized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The record already exists, e.g. a second save of the same job.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// How a notice should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Shown next to the form field that caused it.
    Inline,
    /// Dismissable banner; the action can be re-triggered.
    Banner,
    /// The user has to sign in (again).
    SignIn,
}

/// User-facing description of a `ClientError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ClientError {
    /// Transient network/server failures the user may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Remote(_) | ClientError::Timeout(_))
    }

    /// Errors that mean the current identity is gone.
    pub fn is_auth_loss(&self) -> bool {
        matches!(
            self,
            ClientError::SessionExpired | ClientError::Anonymous | ClientError::NotInitialized
        )
    }

    pub fn notice(&self) -> Notice {
        let (kind, code, message) = match self {
            ClientError::Auth(msg) => (NoticeKind::Inline, "AUTH_ERROR", msg.clone()),
            ClientError::SessionExpired => (
                NoticeKind::SignIn,
                "SESSION_EXPIRED",
                "Your session has expired. Please sign in again.".to_string(),
            ),
            ClientError::Anonymous => (
                NoticeKind::SignIn,
                "UNAUTHENTICATED",
                "Please sign in to continue.".to_string(),
            ),
            ClientError::NotInitialized => (
                NoticeKind::Banner,
                "NOT_READY",
                "Still restoring your session.".to_string(),
            ),
            ClientError::Validation(msg) => (NoticeKind::Inline, "VALIDATION_ERROR", msg.clone()),
            ClientError::NotFound(msg) => (NoticeKind::Banner, "NOT_FOUND", msg.clone()),
            ClientError::Conflict(msg) => (NoticeKind::Inline, "CONFLICT", msg.clone()),
            ClientError::Remote(msg) => {
                tracing::warn!("Remote error: {msg}");
                (
                    NoticeKind::Banner,
                    "REMOTE_ERROR",
                    "The service could not be reached. Please try again.".to_string(),
                )
            }
            ClientError::Timeout(after) => {
                tracing::warn!("Request timed out after {after:?}");
                (
                    NoticeKind::Banner,
                    "TIMEOUT",
                    "The service took too long to respond. Please try again.".to_string(),
                )
            }
            ClientError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    NoticeKind::Banner,
                    "INTERNAL_ERROR",
                    "Something went wrong.".to_string(),
                )
            }
        };

        Notice {
            kind,
            code,
            message,
            retryable: self.is_retryable(),
        }
    }
}

// Handed to every caller waiting on the same ledger mutation. `Internal`
// keeps only the rendered chain.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Auth(msg) => ClientError::Auth(msg.clone()),
            ClientError::SessionExpired => ClientError::SessionExpired,
            ClientError::Anonymous => ClientError::Anonymous,
            ClientError::NotInitialized => ClientError::NotInitialized,
            ClientError::Validation(msg) => ClientError::Validation(msg.clone()),
            ClientError::NotFound(msg) => ClientError::NotFound(msg.clone()),
            ClientError::Conflict(msg) => ClientError::Conflict(msg.clone()),
            ClientError::Remote(msg) => ClientError::Remote(msg.clone()),
            ClientError::Timeout(after) => ClientError::Timeout(*after),
            ClientError::Internal(e) => ClientError::Internal(anyhow::anyhow!("{e:#}")),
        }
    }
}
