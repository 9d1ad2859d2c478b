use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobId;

/// Ledger id of a saved mark. Provisional until the ledger confirms the create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum InteractionId {
    Provisional(Uuid),
    Confirmed(String),
}

impl InteractionId {
    pub fn provisional() -> Self {
        InteractionId::Provisional(Uuid::new_v4())
    }

    pub fn confirmed(&self) -> Option<&str> {
        match self {
            InteractionId::Confirmed(id) => Some(id),
            InteractionId::Provisional(_) => None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, InteractionId::Provisional(_))
    }
}

/// Presence means the job is saved for the current identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedMark {
    pub job_id: JobId,
    pub interaction_id: InteractionId,
}
