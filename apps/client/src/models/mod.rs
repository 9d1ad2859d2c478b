pub mod identity;
pub mod interaction;
pub mod job;
pub mod preferences;

pub use identity::{AuthGrant, Credential, IdentityId, LoginCredentials, Profile, Registration, Session};
pub use interaction::{InteractionId, SavedMark};
pub use job::{JobId, JobSummary, MatchRecord, SalaryRange};
pub use preferences::{PreferenceUpdate, Preferences};
