// Search: the sequence-guarded search state machine.

pub mod orchestrator;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::models::{Credential, JobId, JobSummary, Preferences};

pub use orchestrator::{
    SearchEvent, SearchOrchestrator, SearchOutcome, SearchPhase, SearchSnapshot, SearchTrigger,
};

/// Job catalog contract. One call returns one finite, ordered result set.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    async fn search(
        &self,
        credential: &Credential,
        criteria: &Preferences,
    ) -> Result<Vec<JobSummary>, ClientError>;

    /// One posting by id. `NotFound` once the posting has been withdrawn.
    async fn get_job(&self, credential: &Credential, job: &JobId) -> Result<JobSummary, ClientError>;
}
