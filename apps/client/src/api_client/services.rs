use async_trait::async_trait;
use tracing::debug;

use crate::api_client::dto::{self, CreateInteraction, InteractionDto, TokenResponse, UserDto};
use crate::api_client::ApiClient;
use crate::errors::ClientError;
use crate::ledger::InteractionLedger;
use crate::matching::MatchingService;
use crate::models::{
    AuthGrant, Credential, IdentityId, JobId, JobSummary, LoginCredentials, MatchRecord,
    Preferences, Profile, Registration, SavedMark,
};
use crate::preferences::ProfileService;
use crate::search::JobCatalog;
use crate::session::IdentityService;

impl ApiClient {
    async fn me(&self, credential: &Credential) -> Result<Profile, ClientError> {
        let user: UserDto = self
            .read("/auth/me", |client, url| {
                client.get(url).bearer_auth(credential.as_str())
            })
            .await?;
        Ok(user.into())
    }
}

#[async_trait]
impl IdentityService for ApiClient {
    async fn validate_token(&self, credential: &Credential) -> Result<Profile, ClientError> {
        self.me(credential).await
    }

    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthGrant, ClientError> {
        let path = "/auth/login";
        let body = self
            .write(path, self.client.post(self.url(path)).json(credentials))
            .await?;
        let response: TokenResponse = dto_from(&body)?;
        Ok(response.into())
    }

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, ClientError> {
        let path = "/auth/register";
        let body = self
            .write(path, self.client.post(self.url(path)).json(registration))
            .await?;
        let response: TokenResponse = dto_from(&body)?;
        Ok(response.into())
    }
}

#[async_trait]
impl ProfileService for ApiClient {
    async fn get_preferences(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Preferences, ClientError> {
        let profile = self.me(credential).await?;
        if &profile.id != identity {
            return Err(ClientError::SessionExpired);
        }
        Ok(profile.preferences.unwrap_or_default())
    }

    async fn put_preferences(
        &self,
        credential: &Credential,
        _identity: &IdentityId,
        preferences: &Preferences,
    ) -> Result<Preferences, ClientError> {
        let path = "/auth/preferences";
        let request = self
            .client
            .put(self.url(path))
            .bearer_auth(credential.as_str())
            .json(preferences);
        let body = self.write(path, request).await?;
        let profile: Profile = dto_from::<UserDto>(&body)?.into();
        // older backends answer without the embedded preferences
        Ok(profile.preferences.unwrap_or_else(|| preferences.clone()))
    }
}

#[async_trait]
impl JobCatalog for ApiClient {
    async fn search(
        &self,
        credential: &Credential,
        criteria: &Preferences,
    ) -> Result<Vec<JobSummary>, ClientError> {
        let jobs: Vec<JobSummary> = self
            .read("/jobs/search", |client, url| {
                client
                    .post(url)
                    .bearer_auth(credential.as_str())
                    .json(criteria)
            })
            .await?;
        debug!("Search returned {} jobs", jobs.len());
        Ok(jobs)
    }

    async fn get_job(&self, credential: &Credential, job: &JobId) -> Result<JobSummary, ClientError> {
        let path = format!("/jobs/{job}");
        let summary = self
            .read(&path, |client, url| {
                client.get(url).bearer_auth(credential.as_str())
            })
            .await?;
        Ok(summary)
    }
}

#[async_trait]
impl MatchingService for ApiClient {
    async fn get_match(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<MatchRecord, ClientError> {
        let path = format!("/jobmatches/user/{identity}/job/{job}");
        let record = self
            .read(&path, |client, url| {
                client.get(url).bearer_auth(credential.as_str())
            })
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl InteractionLedger for ApiClient {
    async fn list_interactions(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Vec<SavedMark>, ClientError> {
        let path = format!("/interactions/user/{identity}");
        let interactions: Vec<InteractionDto> = self
            .read(&path, |client, url| {
                client.get(url).bearer_auth(credential.as_str())
            })
            .await?;
        Ok(dto::saved_marks(interactions))
    }

    async fn create_interaction(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<String, ClientError> {
        let path = "/interactions/";
        let request = self
            .client
            .post(self.url(path))
            .bearer_auth(credential.as_str())
            .json(&CreateInteraction {
                user_id: &identity.0,
                job_id: &job.0,
                interaction_type: dto::SAVED,
            });
        let body = self.write(path, request).await?;
        let created: InteractionDto = dto_from(&body)?;
        Ok(created.id)
    }

    async fn delete_interaction(
        &self,
        credential: &Credential,
        interaction_id: &str,
    ) -> Result<(), ClientError> {
        let path = format!("/interactions/{interaction_id}");
        let request = self
            .client
            .delete(self.url(&path))
            .bearer_auth(credential.as_str());
        self.write(&path, request).await?;
        Ok(())
    }
}

fn dto_from<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    Ok(super::decode(body)?)
}
