// Session: identity lifecycle and the auth gate every outbound call passes through.

pub mod store;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::models::{AuthGrant, Credential, LoginCredentials, Profile, Registration};

pub use store::{AuthContext, SessionEvent, SessionStatus, SessionStore};

/// Identity service contract. Rejections come back as `Auth` (bad credentials)
/// or `SessionExpired` (token no longer valid).
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn validate_token(&self, credential: &Credential) -> Result<Profile, ClientError>;

    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthGrant, ClientError>;

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, ClientError>;
}
