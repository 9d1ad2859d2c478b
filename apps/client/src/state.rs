use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::credentials::CredentialStore;
use crate::errors::ClientError;
use crate::ledger::{InteractionLedger, LedgerMirror, SaveView};
use crate::matching::{MatchCache, MatchStatus, MatchingService};
use crate::models::{JobId, JobSummary, LoginCredentials, Registration, Session};
use crate::preferences::{PreferenceStore, ProfileService};
use crate::search::{JobCatalog, SearchOrchestrator, SearchOutcome, SearchTrigger};
use crate::session::{IdentityService, SessionStatus, SessionStore};

/// The collaborators the core talks to.
#[derive(Clone)]
pub struct Backends {
    pub identity: Arc<dyn IdentityService>,
    pub profile: Arc<dyn ProfileService>,
    pub catalog: Arc<dyn JobCatalog>,
    pub matching: Arc<dyn MatchingService>,
    pub ledger: Arc<dyn InteractionLedger>,
}

impl Backends {
    /// One client serving every contract, as `ApiClient` does.
    pub fn single<C>(client: Arc<C>) -> Self
    where
        C: IdentityService
            + ProfileService
            + JobCatalog
            + MatchingService
            + InteractionLedger
            + 'static,
    {
        Self {
            identity: client.clone(),
            profile: client.clone(),
            catalog: client.clone(),
            matching: client.clone(),
            ledger: client,
        }
    }
}

/// Everything a job card shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobCardView {
    pub job: JobSummary,
    pub score: MatchStatus,
    pub saved: SaveView,
}

/// The core's surface towards the presentation layer: the stores, wired to
/// each other's signals.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionStore>,
    pub preferences: Arc<PreferenceStore>,
    pub search: Arc<SearchOrchestrator>,
    pub matches: Arc<MatchCache>,
    pub ledger: Arc<LedgerMirror>,
    catalog: Arc<dyn JobCatalog>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        backends: Backends,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(backends.identity, credentials, settings));
        let preferences = Arc::new(PreferenceStore::new(session.clone(), backends.profile));
        let catalog = backends.catalog;
        let search = SearchOrchestrator::new(session.clone(), catalog.clone());
        let matches = Arc::new(MatchCache::new(session.clone(), backends.matching, settings));
        let ledger = Arc::new(LedgerMirror::new(session.clone(), backends.ledger));

        session.changes().connect(&preferences);
        session.changes().connect(&search);
        session.changes().connect(&matches);
        session.changes().connect(&ledger);

        // invalidate scores before the follow-up search starts
        preferences.changes().connect(&matches);
        preferences.changes().connect(&search);

        search.changes().connect(&matches);

        Self {
            session,
            preferences,
            search,
            matches,
            ledger,
            catalog,
        }
    }

    /// Restores the persisted session, then loads what the identity needs.
    pub async fn start(&self) -> SessionStatus {
        let status = self.session.initialize().await;
        if status == SessionStatus::Authenticated {
            self.load_identity_state().await;
        }
        status
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session, ClientError> {
        let session = self.session.login(credentials).await?;
        self.load_identity_state().await;
        Ok(session)
    }

    pub async fn register(&self, registration: &Registration) -> Result<Session, ClientError> {
        let session = self.session.register(registration).await?;
        self.load_identity_state().await;
        Ok(session)
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    /// Searches with the committed preferences.
    pub async fn search_committed(&self) -> Result<SearchOutcome, ClientError> {
        let criteria = match self.preferences.committed() {
            Some(criteria) => criteria,
            None => self.preferences.load().await?,
        };
        if !criteria.has_criteria() {
            return Err(ClientError::Validation(
                "Add a target role or a skill before searching".to_string(),
            ));
        }
        self.search
            .search(criteria, SearchTrigger::PreferencesCommitted)
            .await
    }

    /// Card views of the current result set. Unknown scores are requested
    /// here, lazily, and show as pending until they resolve.
    pub fn job_cards(&self) -> Vec<JobCardView> {
        let identity = self.session.current().map(|s| s.identity_id);
        self.search
            .snapshot()
            .results
            .into_iter()
            .map(|job| {
                let score = match &identity {
                    Some(identity) => self.matches.get(identity, &job.job_id),
                    None => MatchStatus::Absent,
                };
                let saved = self.ledger.view(&job.job_id);
                JobCardView { job, score, saved }
            })
            .collect()
    }

    /// Like `job_cards`, but waits for every score to settle.
    pub async fn resolved_job_cards(&self) -> Vec<JobCardView> {
        let Some(identity) = self.session.current().map(|s| s.identity_id) else {
            return self.job_cards();
        };
        let jobs = self.search.snapshot().results;
        let scores = join_all(
            jobs.iter()
                .map(|job| self.matches.resolve(&identity, &job.job_id)),
        )
        .await;

        jobs.into_iter()
            .zip(scores)
            .map(|(job, score)| {
                let saved = self.ledger.view(&job.job_id);
                JobCardView { job, score, saved }
            })
            .collect()
    }

    pub async fn toggle_save(&self, job: &JobId) -> Result<SaveView, ClientError> {
        self.ledger.toggle(job).await
    }

    /// The identity's shortlist: every saved job with its details, whether or
    /// not it is part of the current result set. Withdrawn postings are skipped.
    pub async fn saved_jobs(&self) -> Result<Vec<JobSummary>, ClientError> {
        let ctx = self.session.auth_context()?;
        self.ledger.hydrate().await?;

        let known = self.search.snapshot().results;
        let lookups = self.ledger.saved_marks().into_iter().map(|mark| {
            let listed = known.iter().find(|job| job.job_id == mark.job_id).cloned();
            let ctx = &ctx;
            async move {
                if let Some(job) = listed {
                    return Ok(Some(job));
                }
                let fetched = self
                    .session
                    .guard(ctx, self.catalog.get_job(&ctx.credential, &mark.job_id))
                    .await;
                match fetched {
                    Ok(job) => Ok(Some(job)),
                    Err(ClientError::NotFound(_)) => {
                        debug!("Saved job {} is no longer posted", mark.job_id);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        });
        let jobs = join_all(lookups)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, ClientError>>()?;

        self.session.ensure_current(&ctx)?;
        Ok(jobs.into_iter().flatten().collect())
    }

    async fn load_identity_state(&self) {
        let (preferences, saved) = tokio::join!(self.preferences.load(), self.ledger.hydrate());
        match preferences {
            Ok(p) if p.has_criteria() => info!(
                "Loaded preferences: {} roles, {} skills",
                p.target_roles.len(),
                p.skills.len()
            ),
            Ok(_) => info!("No search preferences yet"),
            Err(e) => warn!("Could not load preferences: {e}"),
        }
        if let Err(e) = saved {
            warn!("Could not load saved jobs: {e}");
        }
    }
}
