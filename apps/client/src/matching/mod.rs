// Matching: lazily fetched, coalesced match records per (identity, job).

pub mod cache;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::models::{Credential, IdentityId, JobId, MatchRecord};

pub use cache::{MatchCache, MatchStatus};

/// Matching service contract. The core never computes scores itself.
#[async_trait]
pub trait MatchingService: Send + Sync {
    async fn get_match(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<MatchRecord, ClientError>;
}
