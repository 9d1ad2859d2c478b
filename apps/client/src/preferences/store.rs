//! Preference Store: committed preferences plus an optional editing draft.
//!
//! The draft is private to this store. Committing persists it to the profile
//! service and, on success, replaces the committed copy and emits
//! `PreferencesEvent::Committed`.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use crate::errors::ClientError;
use crate::models::{IdentityId, PreferenceUpdate, Preferences};
use crate::optimistic::{run_optimistic, OptimisticMutation};
use crate::preferences::validation::{validate_preferences, ValidationReport};
use crate::preferences::ProfileService;
use crate::session::{AuthContext, SessionEvent, SessionStore};
use crate::signal::{lock, Signal, Subscriber};

#[derive(Debug, Clone, PartialEq)]
pub enum PreferencesEvent {
    Committed {
        identity_id: IdentityId,
        preferences: Preferences,
    },
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreferencesSnapshot {
    pub committed: Option<Preferences>,
    pub draft: Option<Preferences>,
    pub committing: bool,
}

struct Draft {
    values: Preferences,
    /// Frozen while its commit is in flight.
    committing: bool,
}

#[derive(Default)]
struct PreferenceState {
    committed: Option<Preferences>,
    draft: Option<Draft>,
}

pub struct PreferenceStore {
    session: Arc<SessionStore>,
    profile: Arc<dyn ProfileService>,
    state: Mutex<PreferenceState>,
    changes: Signal<PreferencesEvent>,
}

impl PreferenceStore {
    pub fn new(session: Arc<SessionStore>, profile: Arc<dyn ProfileService>) -> Self {
        Self {
            session,
            profile,
            state: Mutex::new(PreferenceState::default()),
            changes: Signal::new(),
        }
    }

    /// "Preferences changed" signal, consumed by the search orchestrator and match cache.
    pub fn changes(&self) -> &Signal<PreferencesEvent> {
        &self.changes
    }

    pub fn snapshot(&self) -> PreferencesSnapshot {
        let state = lock(&self.state);
        PreferencesSnapshot {
            committed: state.committed.clone(),
            draft: state.draft.as_ref().map(|d| d.values.clone()),
            committing: state.draft.as_ref().is_some_and(|d| d.committing),
        }
    }

    pub fn committed(&self) -> Option<Preferences> {
        lock(&self.state).committed.clone()
    }

    /// Populates the committed copy from the session snapshot, or from the
    /// profile service when the session does not carry one.
    pub async fn load(&self) -> Result<Preferences, ClientError> {
        let ctx = self.session.auth_context()?;

        let embedded = self
            .session
            .current()
            .filter(|s| s.identity_id == ctx.identity_id)
            .and_then(|s| s.preferences);

        let preferences = match embedded {
            Some(preferences) => preferences,
            None => {
                debug!("Fetching preferences for {}", ctx.identity_id);
                self.session
                    .guard(
                        &ctx,
                        self.profile.get_preferences(&ctx.credential, &ctx.identity_id),
                    )
                    .await?
            }
        };

        self.session.ensure_current(&ctx)?;
        lock(&self.state).committed = Some(preferences.clone());
        Ok(preferences)
    }

    /// Opens a draft as a copy of the committed preferences.
    pub fn begin_edit(&self) -> Result<Preferences, ClientError> {
        self.session.auth_context()?;
        let mut state = lock(&self.state);
        if state.draft.as_ref().is_some_and(|d| d.committing) {
            return Err(ClientError::Validation("A commit is already in progress".to_string()));
        }
        let values = state.committed.clone().unwrap_or_default();
        state.draft = Some(Draft {
            values: values.clone(),
            committing: false,
        });
        Ok(values)
    }

    /// Applies one edit to the draft. The committed copy is never touched.
    pub fn update(&self, update: PreferenceUpdate) -> Result<Preferences, ClientError> {
        let mut state = lock(&self.state);
        let draft = state
            .draft
            .as_mut()
            .ok_or_else(|| ClientError::Validation("No edit in progress".to_string()))?;
        if draft.committing {
            return Err(ClientError::Validation("A commit is already in progress".to_string()));
        }
        draft.values.apply(update);
        Ok(draft.values.clone())
    }

    /// Validation state of the open draft, for inline display while editing.
    pub fn validate_draft(&self) -> Option<ValidationReport> {
        lock(&self.state)
            .draft
            .as_ref()
            .map(|d| validate_preferences(&d.values))
    }

    /// Validates and persists the draft.
    ///
    /// On remote failure the draft is kept for a retry and the committed copy
    /// is unchanged. If the session ends meanwhile, the draft is gone too.
    pub async fn commit(&self) -> Result<Preferences, ClientError> {
        let ctx = self.session.auth_context()?;

        let draft = {
            let state = lock(&self.state);
            let draft = state
                .draft
                .as_ref()
                .ok_or_else(|| ClientError::Validation("No edit in progress".to_string()))?;
            if draft.committing {
                return Err(ClientError::Validation(
                    "A commit is already in progress".to_string(),
                ));
            }
            draft.values.clone()
        };

        validate_preferences(&draft).into_result()?;

        let mutation = CommitDraft { store: self, ctx: &ctx };
        run_optimistic(&mutation, |_| {
            self.session.guard(
                &ctx,
                self.profile
                    .put_preferences(&ctx.credential, &ctx.identity_id, &draft),
            )
        })
        .await
    }

    /// Discards the draft. No side effects.
    pub fn cancel_edit(&self) {
        lock(&self.state).draft = None;
    }
}

impl Subscriber<SessionEvent> for PreferenceStore {
    fn notify(&self, event: &SessionEvent) {
        debug!("Clearing preferences after {event:?}");
        let mut state = lock(&self.state);
        state.committed = None;
        state.draft = None;
    }
}

/// Commit of the open draft as an optimistic mutation: the draft is frozen
/// while in flight, replaces the committed copy on success, thaws on failure.
struct CommitDraft<'a> {
    store: &'a PreferenceStore,
    ctx: &'a AuthContext,
}

impl OptimisticMutation for CommitDraft<'_> {
    type Applied = ();
    type Output = Preferences;

    fn label(&self) -> &'static str {
        "preferences commit"
    }

    fn apply(&self) {
        if let Some(draft) = lock(&self.store.state).draft.as_mut() {
            draft.committing = true;
        }
    }

    fn reconcile(&self, _: (), saved: &Preferences) {
        if !self.store.session.is_current(self.ctx) {
            return;
        }
        {
            let mut state = lock(&self.store.state);
            state.committed = Some(saved.clone());
            state.draft = None;
        }
        self.store
            .session
            .update_preferences_snapshot(self.ctx, saved);
        info!("Preferences committed for {}", self.ctx.identity_id);
        self.store.changes.emit(PreferencesEvent::Committed {
            identity_id: self.ctx.identity_id.clone(),
            preferences: saved.clone(),
        });
    }

    fn roll_back(&self, _: (), _error: &ClientError) {
        if !self.store.session.is_current(self.ctx) {
            return;
        }
        if let Some(draft) = lock(&self.store.state).draft.as_mut() {
            draft.committing = false;
        }
    }
}
