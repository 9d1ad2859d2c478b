// Preferences: committed criteria, the editing draft, and validation.

pub mod store;
pub mod validation;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::models::{Credential, IdentityId, Preferences};

pub use store::{PreferenceStore, PreferencesEvent, PreferencesSnapshot};
pub use validation::{validate_preferences, ValidationIssue, ValidationReport};

/// Profile service contract: where committed preferences live.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn get_preferences(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Preferences, ClientError>;

    /// Persists `preferences` and returns the copy the service stored.
    async fn put_preferences(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        preferences: &Preferences,
    ) -> Result<Preferences, ClientError>;
}
