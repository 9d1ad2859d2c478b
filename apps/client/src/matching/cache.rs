//! Match Cache: per-(identity, job) match records, fetched on first view.
//!
//! At most one fetch per key is in flight. Every caller of a key shares one
//! `watch` channel, so callers that arrive while the fetch is running see the
//! same resolution. Invalidation bumps the identity's generation; fetches
//! stamped with an older generation are dropped when they land.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::errors::ClientError;
use crate::matching::MatchingService;
use crate::models::{IdentityId, JobId, MatchRecord};
use crate::preferences::PreferencesEvent;
use crate::search::SearchEvent;
use crate::session::{SessionEvent, SessionStore};
use crate::signal::{lock, Subscriber};

/// What a job card shows for its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum MatchStatus {
    Ready(MatchRecord),
    /// Fetch in flight; render as unknown.
    Pending,
    /// Last fetch failed; render as unknown, retried after the backoff.
    Errored { message: String },
    /// Never requested, or dropped by invalidation.
    Absent,
}

impl MatchStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, MatchStatus::Pending)
    }

    pub fn record(&self) -> Option<&MatchRecord> {
        match self {
            MatchStatus::Ready(record) => Some(record),
            _ => None,
        }
    }
}

type Key = (IdentityId, JobId);

struct Slot {
    status: watch::Sender<MatchStatus>,
    in_flight: bool,
    fetched_at: Option<Instant>,
    /// Earliest time a failed fetch may be repeated.
    retry_at: Option<Instant>,
    /// Evicted while its fetch was running; dropped once the fetch lands.
    evicted: bool,
}

impl Slot {
    fn new() -> Self {
        let (status, _) = watch::channel(MatchStatus::Absent);
        Self {
            status,
            in_flight: false,
            fetched_at: None,
            retry_at: None,
            evicted: false,
        }
    }

    fn current(&self) -> MatchStatus {
        self.status.borrow().clone()
    }
}

#[derive(Default)]
struct CacheState {
    generations: HashMap<IdentityId, u64>,
    slots: HashMap<Key, Slot>,
}

impl CacheState {
    fn generation(&self, identity: &IdentityId) -> u64 {
        self.generations.get(identity).copied().unwrap_or(0)
    }
}

pub struct MatchCache {
    session: Arc<SessionStore>,
    matching: Arc<dyn MatchingService>,
    retry_backoff: Duration,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl MatchCache {
    pub fn new(
        session: Arc<SessionStore>,
        matching: Arc<dyn MatchingService>,
        settings: Settings,
    ) -> Self {
        Self {
            session,
            matching,
            retry_backoff: settings.match_retry_backoff,
            ttl: settings.match_ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns what is known for the key right now and schedules a fetch if needed.
    ///
    /// A record older than the TTL is still returned while one refresh runs in
    /// the background.
    pub fn get(self: &Arc<Self>, identity: &IdentityId, job: &JobId) -> MatchStatus {
        self.request(identity, job).0
    }

    /// Like `get`, but returns the key's channel so the caller can follow it.
    pub fn subscribe(
        self: &Arc<Self>,
        identity: &IdentityId,
        job: &JobId,
    ) -> Option<watch::Receiver<MatchStatus>> {
        self.request(identity, job).1
    }

    /// Current status without scheduling anything.
    pub fn peek(&self, identity: &IdentityId, job: &JobId) -> MatchStatus {
        lock(&self.state)
            .slots
            .get(&(identity.clone(), job.clone()))
            .filter(|slot| !slot.evicted)
            .map(Slot::current)
            .unwrap_or(MatchStatus::Absent)
    }

    /// Waits until the key is no longer pending.
    pub async fn resolve(self: &Arc<Self>, identity: &IdentityId, job: &JobId) -> MatchStatus {
        loop {
            let Some(mut rx) = self.subscribe(identity, job) else {
                return MatchStatus::Absent;
            };
            let resolved = match rx.wait_for(|s| !s.is_pending()).await {
                Ok(status) => Some(status.clone()),
                // slot dropped by invalidation; ask again under the new generation
                Err(_) => None,
            };
            if let Some(status) = resolved {
                return status;
            }
        }
    }

    /// Drops every record of `identity`. Fetches already running for it are discarded on arrival.
    pub fn invalidate_all(&self, identity: &IdentityId) {
        let mut state = lock(&self.state);
        let generation = state.generations.entry(identity.clone()).or_default();
        *generation += 1;
        let generation = *generation;
        let before = state.slots.len();
        state.slots.retain(|(owner, _), _| owner != identity);
        debug!(
            "Invalidated {} match records for {identity} (generation {generation})",
            before - state.slots.len()
        );
    }

    /// Evicts records of jobs that are no longer in the result set.
    ///
    /// A slot with a fetch in flight stays until the fetch lands, so asking
    /// for the job again meanwhile joins that fetch instead of starting another.
    pub fn retain_jobs(&self, identity: &IdentityId, jobs: &[JobId]) {
        let keep: HashSet<&JobId> = jobs.iter().collect();
        let mut state = lock(&self.state);
        state.slots.retain(|(owner, job), slot| {
            if owner != identity {
                return true;
            }
            if keep.contains(job) {
                slot.evicted = false;
                return true;
            }
            slot.evicted = slot.in_flight;
            slot.in_flight
        });
    }

    pub fn len(&self) -> usize {
        lock(&self.state)
            .slots
            .values()
            .filter(|slot| !slot.evicted)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ────────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────────

    fn request(
        self: &Arc<Self>,
        identity: &IdentityId,
        job: &JobId,
    ) -> (MatchStatus, Option<watch::Receiver<MatchStatus>>) {
        let signed_in = self
            .session
            .auth_context()
            .is_ok_and(|ctx| &ctx.identity_id == identity);
        if !signed_in {
            return (MatchStatus::Absent, None);
        }

        let now = Instant::now();
        let ttl = self.ttl;
        let (status, rx, fetch) = {
            let mut state = lock(&self.state);
            let generation = state.generation(identity);
            let slot = state
                .slots
                .entry((identity.clone(), job.clone()))
                .or_insert_with(Slot::new);
            slot.evicted = false;

            let backoff_over = slot.retry_at.map_or(true, |at| now >= at);
            let fetch = !slot.in_flight
                && match slot.current() {
                    MatchStatus::Ready(_) => {
                        backoff_over && slot.fetched_at.is_some_and(|at| now.duration_since(at) >= ttl)
                    }
                    MatchStatus::Errored { .. } => backoff_over,
                    MatchStatus::Pending | MatchStatus::Absent => true,
                };

            if fetch {
                slot.in_flight = true;
                if slot.current().record().is_none() {
                    slot.status.send_replace(MatchStatus::Pending);
                }
            }
            (slot.current(), slot.status.subscribe(), fetch.then_some(generation))
        };

        if let Some(generation) = fetch {
            let cache = Arc::clone(self);
            let identity = identity.clone();
            let job = job.clone();
            tokio::spawn(async move {
                cache.fetch(identity, job, generation).await;
            });
        }

        (status, Some(rx))
    }

    async fn fetch(&self, identity: IdentityId, job: JobId, generation: u64) {
        let result = match self.session.auth_context() {
            Ok(ctx) if ctx.identity_id == identity => self
                .session
                .guard(&ctx, self.matching.get_match(&ctx.credential, &identity, &job))
                .await
                .and_then(|record| {
                    if record.has_valid_score() {
                        Ok(record)
                    } else {
                        Err(ClientError::Remote(format!(
                            "score {} for job {job} is outside [0, 1]",
                            record.score
                        )))
                    }
                }),
            Ok(_) => Err(ClientError::Anonymous),
            Err(e) => Err(e),
        };
        self.settle(&identity, &job, generation, result);
    }

    fn settle(
        &self,
        identity: &IdentityId,
        job: &JobId,
        generation: u64,
        result: Result<MatchRecord, ClientError>,
    ) {
        let mut state = lock(&self.state);
        if state.generation(identity) != generation {
            debug!("Discarding match for {job} from generation {generation}");
            return;
        }
        let key = (identity.clone(), job.clone());
        let Some(slot) = state.slots.get_mut(&key) else {
            debug!("Discarding match for evicted job {job}");
            return;
        };
        if slot.evicted {
            debug!("Discarding match for evicted job {job}");
            state.slots.remove(&key);
            return;
        }

        slot.in_flight = false;
        let now = Instant::now();
        match result {
            Ok(record) => {
                slot.fetched_at = Some(now);
                slot.retry_at = None;
                slot.status.send_replace(MatchStatus::Ready(record));
            }
            Err(e) if e.is_auth_loss() => {
                slot.status.send_replace(MatchStatus::Absent);
            }
            Err(e) => {
                warn!("Match fetch for {job} failed: {e}");
                slot.retry_at = Some(now + self.retry_backoff);
                // a failed refresh keeps serving the record it was refreshing
                if slot.current().record().is_none() {
                    slot.status.send_replace(MatchStatus::Errored {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

impl Subscriber<PreferencesEvent> for MatchCache {
    fn notify(&self, event: &PreferencesEvent) {
        let PreferencesEvent::Committed { identity_id, .. } = event;
        self.invalidate_all(identity_id);
    }
}

impl Subscriber<SessionEvent> for MatchCache {
    fn notify(&self, event: &SessionEvent) {
        if event.ends_identity() {
            self.invalidate_all(event.identity_id());
        }
    }
}

impl Subscriber<SearchEvent> for MatchCache {
    fn notify(&self, event: &SearchEvent) {
        let SearchEvent::ResultsReplaced {
            identity_id,
            job_ids,
        } = event;
        self.retain_jobs(identity_id, job_ids);
    }
}
