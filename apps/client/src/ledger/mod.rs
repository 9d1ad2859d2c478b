// Ledger: the client-side mirror of saved jobs.

pub mod mirror;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::models::{Credential, IdentityId, JobId, SavedMark};

pub use mirror::{LedgerMirror, SaveView};

/// Interaction ledger contract. Only "saved" interactions are exchanged.
#[async_trait]
pub trait InteractionLedger: Send + Sync {
    /// Every saved mark of `identity`, with confirmed ids.
    async fn list_interactions(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Vec<SavedMark>, ClientError>;

    /// Records a save and returns the ledger's interaction id.
    async fn create_interaction(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<String, ClientError>;

    /// Removes a save. `NotFound` if the record is already gone.
    async fn delete_interaction(
        &self,
        credential: &Credential,
        interaction_id: &str,
    ) -> Result<(), ClientError>;
}
