//! In-memory backend for tests: every collaborator contract, with injectable
//! latency and failures. Latencies are real `tokio::time::sleep`s, so tests
//! run them under paused time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::Settings;
use crate::credentials::MemoryCredentialStore;
use crate::errors::ClientError;
use crate::ledger::InteractionLedger;
use crate::matching::MatchingService;
use crate::models::{
    AuthGrant, Credential, IdentityId, InteractionId, JobId, JobSummary, LoginCredentials,
    MatchRecord, Preferences, Profile, Registration, SavedMark,
};
use crate::preferences::ProfileService;
use crate::search::JobCatalog;
use crate::session::{IdentityService, SessionStore};
use crate::signal::lock;

pub(crate) const ADA_EMAIL: &str = "ada@example.com";
pub(crate) const ADA_PASSWORD: &str = "correct horse";

struct User {
    email: String,
    password: String,
    name: String,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    users: BTreeMap<IdentityId, User>,
    tokens: HashMap<String, IdentityId>,
    offline: bool,
    preferences: HashMap<IdentityId, Preferences>,
    jobs: Vec<JobSummary>,
    search_latencies: VecDeque<Duration>,
    scores: HashMap<JobId, (f64, Vec<String>)>,
    match_latencies: HashMap<JobId, Duration>,
    interactions: BTreeMap<String, (IdentityId, JobId)>,
    latencies: HashMap<String, Duration>,
    failures: HashMap<String, usize>,
    calls: HashMap<String, usize>,
    mutations_in_flight: HashMap<JobId, usize>,
    max_concurrent_mutations: usize,
    /// The next create is recorded at once but answered after this long.
    create_ack_delay: Option<Duration>,
}

impl Inner {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn profile(&self, id: &IdentityId) -> Option<Profile> {
        self.users.get(id).map(|user| Profile {
            id: id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            preferences: self.preferences.get(id).cloned(),
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    inner: Mutex<Inner>,
}

impl FakeBackend {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── setup ───────────────────────────────────────────────────────────────

    pub(crate) fn add_user(&self, email: &str, password: &str, name: &str) -> IdentityId {
        let mut inner = lock(&self.inner);
        let id = IdentityId(inner.next("user"));
        inner.users.insert(
            id.clone(),
            User {
                email: email.to_string(),
                password: password.to_string(),
                name: name.to_string(),
            },
        );
        id
    }

    pub(crate) fn issue_token(&self, identity: &IdentityId) -> Credential {
        let mut inner = lock(&self.inner);
        let token = inner.next("tok");
        inner.tokens.insert(token.clone(), identity.clone());
        Credential::new(token)
    }

    pub(crate) fn revoke(&self, credential: &Credential) {
        lock(&self.inner).tokens.remove(credential.as_str());
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        lock(&self.inner).offline = offline;
    }

    pub(crate) fn set_preferences(&self, identity: &IdentityId, preferences: Preferences) {
        lock(&self.inner)
            .preferences
            .insert(identity.clone(), preferences);
    }

    pub(crate) fn add_job(&self, id: &str, title: &str) {
        lock(&self.inner).jobs.push(JobSummary {
            job_id: JobId::from(id),
            title: title.to_string(),
            company: "Initech".to_string(),
            location: "Remote".to_string(),
            salary_range: None,
            description: String::new(),
            posting_url: format!("https://jobs.example.com/{id}"),
        });
    }

    /// Latency of the next search call not yet given one.
    pub(crate) fn push_search_latency(&self, latency: Duration) {
        lock(&self.inner).search_latencies.push_back(latency);
    }

    pub(crate) fn set_score(&self, job: &str, score: f64, missing: &[&str]) {
        let missing = missing.iter().map(|s| s.to_string()).collect();
        lock(&self.inner)
            .scores
            .insert(JobId::from(job), (score, missing));
    }

    pub(crate) fn set_match_latency(&self, job: &str, latency: Duration) {
        lock(&self.inner)
            .match_latencies
            .insert(JobId::from(job), latency);
    }

    pub(crate) fn set_latency(&self, operation: &str, latency: Duration) {
        lock(&self.inner)
            .latencies
            .insert(operation.to_string(), latency);
    }

    /// The next `count` calls of `operation` fail with a remote error.
    pub(crate) fn fail_next(&self, operation: &str, count: usize) {
        lock(&self.inner)
            .failures
            .insert(operation.to_string(), count);
    }

    pub(crate) fn seed_interaction(&self, identity: &IdentityId, job: &JobId) -> String {
        let mut inner = lock(&self.inner);
        let id = inner.next("int");
        inner
            .interactions
            .insert(id.clone(), (identity.clone(), job.clone()));
        id
    }

    /// The next create is written to the ledger immediately, then its answer
    /// takes `delay` to come back.
    pub(crate) fn delay_create_ack(&self, delay: Duration) {
        lock(&self.inner).create_ack_delay = Some(delay);
    }

    pub(crate) fn remove_interaction(&self, interaction_id: &str) {
        lock(&self.inner).interactions.remove(interaction_id);
    }

    // ── inspection ──────────────────────────────────────────────────────────

    pub(crate) fn count_calls(&self, operation: &str) -> usize {
        lock(&self.inner)
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Saved jobs as the ledger stores them, sorted.
    pub(crate) fn saved_jobs(&self, identity: &IdentityId) -> Vec<JobId> {
        let inner = lock(&self.inner);
        let mut jobs: Vec<JobId> = inner
            .interactions
            .values()
            .filter(|(owner, _)| owner == identity)
            .map(|(_, job)| job.clone())
            .collect();
        jobs.sort();
        jobs.dedup();
        jobs
    }

    pub(crate) fn interaction_for(&self, identity: &IdentityId, job: &JobId) -> Option<String> {
        lock(&self.inner)
            .interactions
            .iter()
            .find(|(_, (owner, saved))| owner == identity && saved == job)
            .map(|(id, _)| id.clone())
    }

    /// Highest number of ledger mutations seen in flight for a single job.
    pub(crate) fn max_concurrent_mutations(&self) -> usize {
        lock(&self.inner).max_concurrent_mutations
    }

    // ── call plumbing ───────────────────────────────────────────────────────

    /// Counts the call and consumes an injected failure, if any.
    fn enter(&self, operation: &str, latency: Option<Duration>) -> (Duration, bool) {
        let mut inner = lock(&self.inner);
        *inner.calls.entry(operation.to_string()).or_default() += 1;
        let fail = match inner.failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        let latency = latency
            .or_else(|| inner.latencies.get(operation).copied())
            .unwrap_or_default();
        (latency, fail)
    }

    async fn call(&self, operation: &str, latency: Option<Duration>) -> Result<(), ClientError> {
        let (latency, fail) = self.enter(operation, latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if lock(&self.inner).offline {
            return Err(ClientError::Remote("service unreachable".to_string()));
        }
        if fail {
            return Err(ClientError::Remote(format!("injected {operation} failure")));
        }
        Ok(())
    }

    fn identity_of(&self, credential: &Credential) -> Result<IdentityId, ClientError> {
        lock(&self.inner)
            .tokens
            .get(credential.as_str())
            .cloned()
            .ok_or(ClientError::SessionExpired)
    }

    fn authorize(&self, credential: &Credential, identity: &IdentityId) -> Result<(), ClientError> {
        if &self.identity_of(credential)? == identity {
            Ok(())
        } else {
            Err(ClientError::Remote("identity mismatch".to_string()))
        }
    }

    fn grant(&self, identity: &IdentityId) -> Result<AuthGrant, ClientError> {
        let credential = self.issue_token(identity);
        let profile = lock(&self.inner)
            .profile(identity)
            .ok_or_else(|| ClientError::NotFound(format!("user {identity}")))?;
        Ok(AuthGrant {
            credential,
            profile,
        })
    }

    fn record_interaction(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<String, ClientError> {
        self.authorize(credential, identity)?;
        if self.interaction_for(identity, job).is_some() {
            return Err(ClientError::Conflict("Interaction already exists".to_string()));
        }
        Ok(self.seed_interaction(identity, job))
    }

    fn track_mutation(&self, job: &JobId, delta: isize) {
        let mut inner = lock(&self.inner);
        let count = inner.mutations_in_flight.entry(job.clone()).or_default();
        *count = count.saturating_add_signed(delta);
        let count = *count;
        inner.max_concurrent_mutations = inner.max_concurrent_mutations.max(count);
    }
}

#[async_trait]
impl IdentityService for FakeBackend {
    async fn validate_token(&self, credential: &Credential) -> Result<Profile, ClientError> {
        self.call("validate_token", None).await?;
        let identity = self.identity_of(credential)?;
        lock(&self.inner)
            .profile(&identity)
            .ok_or(ClientError::SessionExpired)
    }

    async fn login(&self, credentials: &LoginCredentials) -> Result<AuthGrant, ClientError> {
        self.call("login", None).await?;
        let identity = lock(&self.inner)
            .users
            .iter()
            .find(|(_, u)| u.email == credentials.email && u.password == credentials.password)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| ClientError::Auth("Invalid email or password".to_string()))?;
        self.grant(&identity)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthGrant, ClientError> {
        self.call("register", None).await?;
        let taken = lock(&self.inner)
            .users
            .values()
            .any(|u| u.email == registration.email);
        if taken {
            return Err(ClientError::Validation("Email already registered".to_string()));
        }
        let identity = self.add_user(&registration.email, &registration.password, &registration.name);
        self.grant(&identity)
    }
}

#[async_trait]
impl ProfileService for FakeBackend {
    async fn get_preferences(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Preferences, ClientError> {
        self.call("get_preferences", None).await?;
        self.authorize(credential, identity)?;
        Ok(lock(&self.inner)
            .preferences
            .get(identity)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_preferences(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        preferences: &Preferences,
    ) -> Result<Preferences, ClientError> {
        self.call("put_preferences", None).await?;
        self.authorize(credential, identity)?;
        if let (Some(min), Some(max)) = (preferences.salary_min, preferences.salary_max) {
            if min > max {
                return Err(ClientError::Validation("salary_min exceeds salary_max".to_string()));
            }
        }
        lock(&self.inner)
            .preferences
            .insert(identity.clone(), preferences.clone());
        Ok(preferences.clone())
    }
}

#[async_trait]
impl JobCatalog for FakeBackend {
    async fn search(
        &self,
        credential: &Credential,
        criteria: &Preferences,
    ) -> Result<Vec<JobSummary>, ClientError> {
        let latency = lock(&self.inner).search_latencies.pop_front();
        self.call("search", latency).await?;
        self.identity_of(credential)?;

        let roles: Vec<String> = criteria.target_roles.iter().map(|r| r.to_lowercase()).collect();
        Ok(lock(&self.inner)
            .jobs
            .iter()
            .filter(|job| {
                let title = job.title.to_lowercase();
                roles.is_empty() || roles.iter().any(|role| title.contains(role))
            })
            .cloned()
            .collect())
    }

    async fn get_job(&self, credential: &Credential, job: &JobId) -> Result<JobSummary, ClientError> {
        self.call("get_job", None).await?;
        self.identity_of(credential)?;
        lock(&self.inner)
            .jobs
            .iter()
            .find(|posting| &posting.job_id == job)
            .cloned()
            .ok_or_else(|| ClientError::NotFound("Job not found".to_string()))
    }
}

#[async_trait]
impl MatchingService for FakeBackend {
    async fn get_match(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<MatchRecord, ClientError> {
        let latency = {
            let mut inner = lock(&self.inner);
            *inner.calls.entry(format!("get_match:{job}")).or_default() += 1;
            inner.match_latencies.get(job).copied()
        };
        self.call("get_match", latency).await?;
        self.authorize(credential, identity)?;

        let (score, missing_skills) = lock(&self.inner)
            .scores
            .get(job)
            .cloned()
            .unwrap_or((0.5, Vec::new()));
        Ok(MatchRecord {
            job_id: job.clone(),
            score,
            missing_skills,
            matched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl InteractionLedger for FakeBackend {
    async fn list_interactions(
        &self,
        credential: &Credential,
        identity: &IdentityId,
    ) -> Result<Vec<SavedMark>, ClientError> {
        // the ledger as it stood when the request arrived
        let marks: Vec<SavedMark> = lock(&self.inner)
            .interactions
            .iter()
            .filter(|(_, (owner, _))| owner == identity)
            .map(|(id, (_, job))| SavedMark {
                job_id: job.clone(),
                interaction_id: InteractionId::Confirmed(id.clone()),
            })
            .collect();
        self.call("list_interactions", None).await?;
        self.authorize(credential, identity)?;
        Ok(marks)
    }

    async fn create_interaction(
        &self,
        credential: &Credential,
        identity: &IdentityId,
        job: &JobId,
    ) -> Result<String, ClientError> {
        self.track_mutation(job, 1);
        let ack_delay = lock(&self.inner).create_ack_delay.take();
        let result = match ack_delay {
            Some(delay) => {
                let recorded = self.record_interaction(credential, identity, job);
                self.call("create_interaction", Some(delay)).await.and(recorded)
            }
            None => match self.call("create_interaction", None).await {
                Ok(()) => self.record_interaction(credential, identity, job),
                Err(e) => Err(e),
            },
        };
        self.track_mutation(job, -1);
        result
    }

    async fn delete_interaction(
        &self,
        credential: &Credential,
        interaction_id: &str,
    ) -> Result<(), ClientError> {
        let job = lock(&self.inner)
            .interactions
            .get(interaction_id)
            .map(|(_, job)| job.clone());
        if let Some(job) = &job {
            self.track_mutation(job, 1);
        }
        let result = self.call("delete_interaction", None).await;
        if let Some(job) = &job {
            self.track_mutation(job, -1);
        }
        result?;
        let identity = self.identity_of(credential)?;

        let mut inner = lock(&self.inner);
        match inner.interactions.get(interaction_id) {
            Some((owner, _)) if *owner == identity => {
                inner.interactions.remove(interaction_id);
                Ok(())
            }
            _ => Err(ClientError::NotFound(format!("interaction {interaction_id}"))),
        }
    }
}

/// A session store signed in as Ada against `backend`.
pub(crate) async fn signed_in_session(backend: &Arc<FakeBackend>) -> Arc<SessionStore> {
    backend.add_user(ADA_EMAIL, ADA_PASSWORD, "Ada");
    let session = Arc::new(SessionStore::new(
        backend.clone(),
        Arc::new(MemoryCredentialStore::default()),
        Settings::default(),
    ));
    session.initialize().await;
    session
        .login(&LoginCredentials {
            email: ADA_EMAIL.to_string(),
            password: ADA_PASSWORD.to_string(),
        })
        .await
        .expect("fake login succeeds");
    session
}
