// Wire types of the job-matching backend. Converted into core models at the edge.

use serde::{Deserialize, Serialize};

use crate::models::{
    AuthGrant, Credential, IdentityId, InteractionId, JobId, Preferences, Profile, SavedMark,
};

pub const SAVED: &str = "saved";

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

/// Preferences as the backend sends them; lists may be null.
#[derive(Debug, Default, Deserialize)]
pub struct PreferencesDto {
    #[serde(default)]
    pub target_roles: Option<Vec<String>>,
    #[serde(default)]
    pub desired_locations: Option<Vec<String>>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub salary_min: Option<u32>,
    #[serde(default)]
    pub salary_max: Option<u32>,
}

impl From<PreferencesDto> for Preferences {
    fn from(dto: PreferencesDto) -> Self {
        Preferences::new(
            dto.target_roles.unwrap_or_default(),
            dto.desired_locations.unwrap_or_default(),
            dto.skills.unwrap_or_default(),
        )
        .with_salary(dto.salary_min, dto.salary_max)
    }
}

#[derive(Debug, Deserialize)]
pub struct UserDto {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferences: Option<PreferencesDto>,
}

impl From<UserDto> for Profile {
    fn from(user: UserDto) -> Self {
        Profile {
            id: IdentityId(user.id),
            name: user.name.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            preferences: user.preferences.map(Preferences::from),
        }
    }
}

/// Response of `/auth/login` and `/auth/register`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: UserDto,
}

impl From<TokenResponse> for AuthGrant {
    fn from(response: TokenResponse) -> Self {
        AuthGrant {
            credential: Credential::new(response.access_token),
            profile: response.user.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateInteraction<'a> {
    pub user_id: &'a str,
    pub job_id: &'a str,
    pub interaction_type: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct InteractionDto {
    #[serde(alias = "_id")]
    pub id: String,
    pub job_id: String,
    #[serde(default)]
    pub interaction_type: Option<String>,
}

/// Saved interactions only, one mark per job.
pub fn saved_marks(interactions: Vec<InteractionDto>) -> Vec<SavedMark> {
    let mut marks: Vec<SavedMark> = Vec::new();
    for interaction in interactions {
        if interaction.interaction_type.as_deref() != Some(SAVED) {
            continue;
        }
        let job_id = JobId(interaction.job_id);
        if marks.iter().any(|m| m.job_id == job_id) {
            continue;
        }
        marks.push(SavedMark {
            job_id,
            interaction_id: InteractionId::Confirmed(interaction.id),
        });
    }
    marks
}
