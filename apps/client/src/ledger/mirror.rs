//! Interaction Ledger Mirror: which jobs the current identity has saved.
//!
//! A toggle changes the displayed state at once and records it as the job's
//! target. One driver task per job then walks the ledger towards the target,
//! one mutating call at a time: a create must be confirmed before the delete
//! that depends on its id is sent, and toggles that land while a call is in
//! flight only move the target, so just the final state is sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::ledger::InteractionLedger;
use crate::models::{InteractionId, JobId, SavedMark};
use crate::optimistic::{run_optimistic, OptimisticMutation};
use crate::session::{AuthContext, SessionEvent, SessionStore};
use crate::signal::{lock, Subscriber};

/// Per-job view for a job card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveView {
    pub saved: bool,
    /// A ledger call for this job is in flight.
    pub pending: bool,
    /// Why the last toggle did not stick. Cleared by the next toggle.
    pub error: Option<String>,
}

struct JobEntry {
    /// What the user sees, and the state the driver works towards.
    mark: Option<InteractionId>,
    /// Interaction id of the record known to exist in the ledger.
    remote: Option<String>,
    last_error: Option<ClientError>,
    /// True while a driver owns this job.
    busy: watch::Sender<bool>,
    /// `MirrorState::touches` at the last local change.
    touched: u64,
}

impl JobEntry {
    fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            mark: None,
            remote: None,
            last_error: None,
            busy,
            touched: 0,
        }
    }

    fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    fn next_step(&self) -> Option<Step> {
        match (&self.mark, &self.remote) {
            (Some(_), None) => Some(Step::Create),
            (None, Some(id)) => Some(Step::Delete(id.clone())),
            _ => None,
        }
    }

    fn view(&self) -> SaveView {
        SaveView {
            saved: self.mark.is_some(),
            pending: self.is_busy(),
            error: self.last_error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Default)]
struct MirrorState {
    entries: HashMap<JobId, JobEntry>,
    /// Session epoch the marks were last hydrated under.
    hydrated: Option<u64>,
    /// Bumped by every toggle and every settled ledger call.
    touches: u64,
}

impl MirrorState {
    fn touch(&mut self, job: &JobId) -> Option<&mut JobEntry> {
        self.touches += 1;
        let touches = self.touches;
        let entry = self.entries.get_mut(job)?;
        entry.touched = touches;
        Some(entry)
    }
}

pub struct LedgerMirror {
    session: Arc<SessionStore>,
    ledger: Arc<dyn InteractionLedger>,
    state: Mutex<MirrorState>,
}

impl LedgerMirror {
    pub fn new(session: Arc<SessionStore>, ledger: Arc<dyn InteractionLedger>) -> Self {
        Self {
            session,
            ledger,
            state: Mutex::new(MirrorState::default()),
        }
    }

    /// Loads the identity's saved marks. Runs once per session; later calls are no-ops.
    ///
    /// Jobs toggled since the listing was requested keep their local state:
    /// the listing may predate their ledger call.
    pub async fn hydrate(&self) -> Result<usize, ClientError> {
        let ctx = self.session.auth_context()?;
        let since = {
            let state = lock(&self.state);
            if state.hydrated == Some(ctx.epoch) {
                return Ok(state.entries.values().filter(|e| e.mark.is_some()).count());
            }
            state.touches
        };

        let marks = self
            .session
            .guard(
                &ctx,
                self.ledger
                    .list_interactions(&ctx.credential, &ctx.identity_id),
            )
            .await?;

        let remote: HashMap<JobId, String> = marks
            .into_iter()
            .filter_map(|mark| {
                let id = mark.interaction_id.confirmed()?.to_string();
                Some((mark.job_id, id))
            })
            .collect();

        let mut state = lock(&self.state);
        self.session.ensure_current(&ctx)?;

        let local = |entry: &JobEntry| entry.is_busy() || entry.touched > since;
        state
            .entries
            .retain(|job, entry| local(&*entry) || remote.contains_key(job));
        for (job, id) in remote {
            let entry = state.entries.entry(job).or_insert_with(JobEntry::new);
            if local(&*entry) {
                continue;
            }
            entry.mark = Some(InteractionId::Confirmed(id.clone()));
            entry.remote = Some(id);
            entry.last_error = None;
        }
        state.hydrated = Some(ctx.epoch);

        let saved = state.entries.values().filter(|e| e.mark.is_some()).count();
        info!("Hydrated {saved} saved jobs for {}", ctx.identity_id);
        Ok(saved)
    }

    pub fn is_saved(&self, job: &JobId) -> bool {
        lock(&self.state)
            .entries
            .get(job)
            .is_some_and(|e| e.mark.is_some())
    }

    pub fn view(&self, job: &JobId) -> SaveView {
        lock(&self.state)
            .entries
            .get(job)
            .map(JobEntry::view)
            .unwrap_or_default()
    }

    pub fn saved_marks(&self) -> Vec<SavedMark> {
        let state = lock(&self.state);
        let mut marks: Vec<SavedMark> = state
            .entries
            .iter()
            .filter_map(|(job, entry)| {
                entry.mark.clone().map(|interaction_id| SavedMark {
                    job_id: job.clone(),
                    interaction_id,
                })
            })
            .collect();
        marks.sort_by(|a, b| a.job_id.0.cmp(&b.job_id.0));
        marks
    }

    /// Saves `job`. Resolves once the ledger has caught up with the job's final target.
    pub async fn toggle_save(self: &Arc<Self>, job: &JobId) -> Result<SaveView, ClientError> {
        self.set_target(job, true).await
    }

    /// Unsaves `job`. An unsave issued before the save is confirmed waits for it.
    pub async fn toggle_unsave(self: &Arc<Self>, job: &JobId) -> Result<SaveView, ClientError> {
        self.set_target(job, false).await
    }

    /// Flips the displayed state of `job`.
    pub async fn toggle(self: &Arc<Self>, job: &JobId) -> Result<SaveView, ClientError> {
        let saved = self.is_saved(job);
        self.set_target(job, !saved).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────────

    async fn set_target(self: &Arc<Self>, job: &JobId, saved: bool) -> Result<SaveView, ClientError> {
        let ctx = self.session.auth_context()?;

        let (mut busy, start_driver) = {
            let mut state = lock(&self.state);
            state.touches += 1;
            let touched = state.touches;
            let entry = state
                .entries
                .entry(job.clone())
                .or_insert_with(JobEntry::new);
            entry.touched = touched;

            if entry.mark.is_some() != saved {
                entry.mark = if saved {
                    Some(InteractionId::provisional())
                } else {
                    None
                };
            }
            entry.last_error = None;

            let start_driver = !entry.is_busy() && entry.next_step().is_some();
            if start_driver {
                entry.busy.send_replace(true);
            }
            (entry.busy.subscribe(), start_driver)
        };

        if start_driver {
            let mirror = Arc::clone(self);
            let job = job.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                mirror.drive(job, ctx).await;
            });
        }

        if busy.wait_for(|busy| !busy).await.is_err() {
            // the mirror was cleared by a session change
            self.session.ensure_current(&ctx)?;
            return Err(ClientError::SessionExpired);
        }
        self.session.ensure_current(&ctx)?;

        let state = lock(&self.state);
        match state.entries.get(job) {
            Some(entry) => match &entry.last_error {
                Some(e) => Err(e.clone()),
                None => Ok(entry.view()),
            },
            None => Ok(SaveView::default()),
        }
    }

    /// Sends one ledger call at a time until the job's remote state matches its target.
    async fn drive(&self, job: JobId, ctx: AuthContext) {
        loop {
            let step = {
                let mut state = lock(&self.state);
                if !self.session.is_current(&ctx) {
                    return;
                }
                let Some(entry) = state.entries.get_mut(&job) else {
                    return;
                };
                match entry.next_step() {
                    Some(step) => step,
                    None => {
                        entry.busy.send_replace(false);
                        return;
                    }
                }
            };

            let mutation = LedgerStep {
                mirror: self,
                ctx: &ctx,
                job: &job,
                step: &step,
            };
            let result = run_optimistic(&mutation, |_| self.send(&ctx, &job, &step)).await;

            if let Err(e) = result {
                if e.is_auth_loss() {
                    // the session signal has already cleared this job
                    return;
                }
            }
        }
    }

    async fn send(&self, ctx: &AuthContext, job: &JobId, step: &Step) -> Result<Option<String>, ClientError> {
        match step {
            Step::Create => {
                let created = self
                    .session
                    .guard(
                        ctx,
                        self.ledger
                            .create_interaction(&ctx.credential, &ctx.identity_id, job),
                    )
                    .await;
                match created {
                    Ok(id) => Ok(Some(id)),
                    // the record may exist even though this call did not report it
                    Err(e @ (ClientError::Conflict(_) | ClientError::Timeout(_))) => {
                        match self.find_remote(ctx, job).await {
                            Some(id) => {
                                debug!("Save of {job} was already recorded as {id}");
                                Ok(Some(id))
                            }
                            None => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            Step::Delete(id) => {
                let deleted = self
                    .session
                    .guard(ctx, self.ledger.delete_interaction(&ctx.credential, id))
                    .await;
                match deleted {
                    Ok(()) => Ok(None),
                    Err(ClientError::NotFound(_)) => {
                        debug!("Interaction {id} for {job} was already gone");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Interaction id the ledger holds for `job`, if the listing succeeds.
    async fn find_remote(&self, ctx: &AuthContext, job: &JobId) -> Option<String> {
        let marks = self
            .session
            .guard(
                ctx,
                self.ledger
                    .list_interactions(&ctx.credential, &ctx.identity_id),
            )
            .await
            .inspect_err(|e| warn!("Could not check the ledger for {job}: {e}"))
            .ok()?;
        marks
            .into_iter()
            .find(|mark| &mark.job_id == job)
            .and_then(|mark| mark.interaction_id.confirmed().map(str::to_string))
    }
}

impl Subscriber<SessionEvent> for LedgerMirror {
    fn notify(&self, event: &SessionEvent) {
        debug!("Clearing saved jobs after {event:?}");
        let mut state = lock(&self.state);
        state.entries.clear();
        state.hydrated = None;
    }
}

#[derive(Debug, Clone)]
enum Step {
    Create,
    Delete(String),
}

/// One ledger call for one job, reconciled against whatever the user has
/// toggled to while it was in flight.
struct LedgerStep<'a> {
    mirror: &'a LedgerMirror,
    ctx: &'a AuthContext,
    job: &'a JobId,
    step: &'a Step,
}

impl LedgerStep<'_> {
    /// Runs `f` on the job's entry unless the session moved on.
    fn with_entry(&self, f: impl FnOnce(&mut JobEntry)) {
        let mut state = lock(&self.mirror.state);
        if !self.mirror.session.is_current(self.ctx) {
            return;
        }
        if let Some(entry) = state.touch(self.job) {
            f(entry);
        }
    }
}

impl OptimisticMutation for LedgerStep<'_> {
    /// Displayed saved state when the call was issued.
    type Applied = bool;
    /// Interaction id after a create; nothing after a delete.
    type Output = Option<String>;

    fn label(&self) -> &'static str {
        match self.step {
            Step::Create => "save",
            Step::Delete(_) => "unsave",
        }
    }

    fn apply(&self) -> bool {
        let mut shown = matches!(self.step, Step::Create);
        self.with_entry(|entry| shown = entry.mark.is_some());
        debug!("Sending {} for {}", self.label(), self.job);
        shown
    }

    fn reconcile(&self, _shown: bool, output: &Option<String>) {
        self.with_entry(|entry| {
            entry.remote = output.clone();
            // still wanted: swap the provisional id for the ledger's
            if let (Some(mark), Some(id)) = (entry.mark.as_mut(), output) {
                *mark = InteractionId::Confirmed(id.clone());
            }
        });
    }

    fn roll_back(&self, _shown: bool, error: &ClientError) {
        let job = self.job;
        self.with_entry(|entry| match self.step {
            Step::Create if entry.mark.is_some() => {
                warn!("Save of {job} failed: {error}");
                entry.mark = None;
                entry.last_error = Some(error.clone());
            }
            Step::Delete(id) if entry.mark.is_none() => {
                warn!("Unsave of {job} failed: {error}");
                entry.mark = Some(InteractionId::Confirmed(id.clone()));
                entry.last_error = Some(error.clone());
            }
            // the user already toggled back; the ledger state is what they want
            Step::Create => {}
            Step::Delete(id) => {
                entry.mark = Some(InteractionId::Confirmed(id.clone()));
            }
        });
    }
}
