//! Search Orchestrator: `Idle → Searching → Ready | Failed`, forever.
//!
//! Each search gets the next sequence number. A response is applied only if
//! its sequence is still the latest issued; anything older is dropped, so a
//! slow early search can never overwrite a faster later one.

use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::models::{IdentityId, JobId, JobSummary, Preferences};
use crate::preferences::{validate_preferences, PreferencesEvent};
use crate::search::JobCatalog;
use crate::session::{AuthContext, SessionEvent, SessionStore};
use crate::signal::{Signal, Subscriber};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Idle,
    Searching,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTrigger {
    PreferencesCommitted,
    AdHoc,
    Retry,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchSnapshot {
    pub phase: SearchPhase,
    /// Latest sequence number issued.
    pub sequence: u64,
    /// Sequence whose results are in `results` (0 = none yet).
    pub applied_sequence: u64,
    pub results: Vec<JobSummary>,
    /// Criteria of the latest issued search.
    pub criteria: Option<Preferences>,
    pub trigger: Option<SearchTrigger>,
    /// Retryable error of the latest search, while `phase == Failed`.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Applied { sequence: u64, count: usize },
    /// A newer search was issued (or the session changed) before this one returned.
    Superseded { sequence: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    ResultsReplaced {
        identity_id: IdentityId,
        job_ids: Vec<JobId>,
    },
}

pub struct SearchOrchestrator {
    session: Arc<SessionStore>,
    catalog: Arc<dyn JobCatalog>,
    state: watch::Sender<SearchSnapshot>,
    changes: Signal<SearchEvent>,
    this: Weak<SearchOrchestrator>,
}

impl SearchOrchestrator {
    pub fn new(session: Arc<SessionStore>, catalog: Arc<dyn JobCatalog>) -> Arc<Self> {
        let (state, _) = watch::channel(SearchSnapshot::default());
        Arc::new_cyclic(|this| Self {
            session,
            catalog,
            state,
            changes: Signal::new(),
            this: this.clone(),
        })
    }

    /// Emits `ResultsReplaced` after every applied result set.
    pub fn changes(&self) -> &Signal<SearchEvent> {
        &self.changes
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SearchSnapshot> {
        self.state.subscribe()
    }

    /// Waits until no search is in flight and returns the resulting state.
    pub async fn settled(&self) -> SearchSnapshot {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|s| s.phase != SearchPhase::Searching).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => SearchSnapshot::default(),
        };
        settled
    }

    /// Runs a user-initiated search with criteria that are not persisted.
    pub async fn search_adhoc(&self, criteria: Preferences) -> Result<SearchOutcome, ClientError> {
        validate_preferences(&criteria).into_result()?;
        self.search(criteria, SearchTrigger::AdHoc).await
    }

    /// Re-runs the latest criteria after a failure.
    pub async fn retry(&self) -> Result<SearchOutcome, ClientError> {
        let criteria = {
            let state = self.state.borrow();
            if state.phase != SearchPhase::Failed {
                return Err(ClientError::Validation("Nothing to retry".to_string()));
            }
            state.criteria.clone()
        };
        let criteria =
            criteria.ok_or_else(|| ClientError::Validation("Nothing to retry".to_string()))?;
        self.search(criteria, SearchTrigger::Retry).await
    }

    pub async fn search(
        &self,
        criteria: Preferences,
        trigger: SearchTrigger,
    ) -> Result<SearchOutcome, ClientError> {
        let ctx = self.session.auth_context()?;
        let sequence = self.begin(&criteria, trigger);
        self.run(ctx, sequence, criteria).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────────

    fn begin(&self, criteria: &Preferences, trigger: SearchTrigger) -> u64 {
        let mut sequence = 0;
        self.state.send_modify(|s| {
            s.sequence += 1;
            sequence = s.sequence;
            s.phase = SearchPhase::Searching;
            s.criteria = Some(criteria.clone());
            s.trigger = Some(trigger);
        });
        info!("Search #{sequence} started ({trigger:?})");
        sequence
    }

    async fn run(
        &self,
        ctx: AuthContext,
        sequence: u64,
        criteria: Preferences,
    ) -> Result<SearchOutcome, ClientError> {
        let result = self
            .session
            .guard(&ctx, self.catalog.search(&ctx.credential, &criteria))
            .await;

        if !self.session.is_current(&ctx) {
            debug!("Search #{sequence} finished after the session changed");
            return match result {
                Err(e) => Err(e),
                Ok(_) => Ok(SearchOutcome::Superseded { sequence }),
            };
        }

        let mut latest = false;
        self.state.send_if_modified(|s| {
            if s.sequence != sequence {
                return false;
            }
            latest = true;
            match &result {
                Ok(jobs) => {
                    s.phase = SearchPhase::Ready;
                    s.results = jobs.clone();
                    s.applied_sequence = sequence;
                    s.error = None;
                }
                Err(e) => {
                    // keep the last good results on screen
                    s.phase = SearchPhase::Failed;
                    s.error = Some(e.to_string());
                }
            }
            true
        });

        if !latest {
            debug!("Discarding stale search #{sequence}");
            return Ok(SearchOutcome::Superseded { sequence });
        }

        match result {
            Ok(jobs) => {
                info!("Search #{sequence} returned {} jobs", jobs.len());
                self.changes.emit(SearchEvent::ResultsReplaced {
                    identity_id: ctx.identity_id.clone(),
                    job_ids: jobs.iter().map(|j| j.job_id.clone()).collect(),
                });
                Ok(SearchOutcome::Applied {
                    sequence,
                    count: jobs.len(),
                })
            }
            Err(e) => {
                warn!("Search #{sequence} failed: {e}");
                Err(e)
            }
        }
    }
}

impl Subscriber<PreferencesEvent> for SearchOrchestrator {
    fn notify(&self, event: &PreferencesEvent) {
        let PreferencesEvent::Committed { preferences, .. } = event;
        let (Some(this), Ok(ctx)) = (self.this.upgrade(), self.session.auth_context()) else {
            return;
        };
        let sequence = self.begin(preferences, SearchTrigger::PreferencesCommitted);
        let criteria = preferences.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run(ctx, sequence, criteria).await {
                warn!("Search after preferences commit failed: {e}");
            }
        });
    }
}

impl Subscriber<SessionEvent> for SearchOrchestrator {
    fn notify(&self, event: &SessionEvent) {
        debug!("Resetting search state after {event:?}");
        self.state.send_modify(|s| {
            // bumping the sequence makes any in-flight search stale
            let sequence = s.sequence + 1;
            *s = SearchSnapshot {
                sequence,
                ..SearchSnapshot::default()
            };
        });
    }
}
