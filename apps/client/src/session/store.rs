//! Session Store: single owner of the identity and credential.
//!
//! Every other store reads the credential through `auth_context()` right before
//! each remote call and runs the call through `guard()`, which bounds it with
//! the request timeout and turns an authorization failure into a forced sign-out.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::credentials::{CredentialStore, PersistedCredential};
use crate::errors::ClientError;
use crate::models::{AuthGrant, Credential, IdentityId, LoginCredentials, Preferences, Registration, Session};
use crate::session::IdentityService;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// `initialize()` has not completed yet.
    Uninitialized,
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn { identity_id: IdentityId },
    SignedOut { identity_id: IdentityId },
    /// The backend rejected the credential mid-session.
    Expired { identity_id: IdentityId },
}

impl SessionEvent {
    pub fn identity_id(&self) -> &IdentityId {
        match self {
            SessionEvent::SignedIn { identity_id }
            | SessionEvent::SignedOut { identity_id }
            | SessionEvent::Expired { identity_id } => identity_id,
        }
    }

    /// True for events after which the identity's state must be discarded.
    pub fn ends_identity(&self) -> bool {
        !matches!(self, SessionEvent::SignedIn { .. })
    }
}

/// Snapshot of who is calling, taken right before a remote call.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity_id: IdentityId,
    pub credential: Credential,
    /// Session epoch the call was issued under.
    pub epoch: u64,
}

enum SessionState {
    Uninitialized,
    Anonymous,
    Authenticated(Session),
}

struct Inner {
    state: SessionState,
    /// Bumped on every session change; results stamped with an older epoch are stale.
    epoch: u64,
}

#[derive(Clone, Copy)]
enum Ending {
    SignedOut,
    Expired,
}

pub struct SessionStore {
    identity: Arc<dyn IdentityService>,
    credentials: Arc<dyn CredentialStore>,
    request_timeout: Duration,
    inner: RwLock<Inner>,
    changes: Signal<SessionEvent>,
}

impl SessionStore {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        credentials: Arc<dyn CredentialStore>,
        settings: Settings,
    ) -> Self {
        Self {
            identity,
            credentials,
            request_timeout: settings.request_timeout,
            inner: RwLock::new(Inner {
                state: SessionState::Uninitialized,
                epoch: 0,
            }),
            changes: Signal::new(),
        }
    }

    /// "Session changed" signal. Dependent stores connect here.
    pub fn changes(&self) -> &Signal<SessionEvent> {
        &self.changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.changes.observe()
    }

    pub fn status(&self) -> SessionStatus {
        match self.read().state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Anonymous => SessionStatus::Anonymous,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
        }
    }

    pub fn current(&self) -> Option<Session> {
        match &self.read().state {
            SessionState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Restores a persisted credential, if any, by validating it with the identity service.
    ///
    /// Always completes with `Authenticated` or `Anonymous`. A rejected credential
    /// is removed from storage; a transient failure keeps it for the next start.
    pub async fn initialize(&self) -> SessionStatus {
        let started_epoch = self.epoch();

        let persisted = match self.credentials.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Failed to read persisted credential: {e:#}");
                None
            }
        };

        let Some(persisted) = persisted else {
            info!("No persisted credential; starting anonymous");
            return self.settle_initialize(started_epoch, None);
        };

        let validated = self.bounded(self.identity.validate_token(&persisted.token)).await;

        match validated {
            Ok(mut profile) => {
                // the stored profile fills in what the validated one leaves out
                if profile.preferences.is_none() {
                    profile.preferences = persisted
                        .profile
                        .filter(|stored| stored.id == profile.id)
                        .and_then(|stored| stored.preferences);
                }
                let session = Session::new(persisted.token, profile);
                info!("Restored session for {}", session.identity_id);
                self.settle_initialize(started_epoch, Some(session))
            }
            Err(e) if e.is_retryable() => {
                warn!("Could not validate persisted credential, keeping it for later: {e}");
                self.settle_initialize(started_epoch, None)
            }
            Err(e) => {
                info!("Persisted credential rejected: {e}");
                self.forget_persisted();
                self.settle_initialize(started_epoch, None)
            }
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session, ClientError> {
        let grant = self
            .bounded(self.identity.login(credentials))
            .await
            .map_err(as_auth_error)?;
        info!("Signed in as {}", grant.profile.id);
        Ok(self.establish(grant))
    }

    pub async fn register(&self, registration: &Registration) -> Result<Session, ClientError> {
        let grant = self
            .bounded(self.identity.register(registration))
            .await
            .map_err(as_auth_error)?;
        info!("Registered {}", grant.profile.id);
        Ok(self.establish(grant))
    }

    /// Clears the session in memory and on disk. Never fails.
    pub fn logout(&self) {
        self.forget_persisted();
        self.replace(None, Ending::SignedOut);
    }

    /// Current identity and credential, or why there is none.
    pub fn auth_context(&self) -> Result<AuthContext, ClientError> {
        let inner = self.read();
        match &inner.state {
            SessionState::Uninitialized => Err(ClientError::NotInitialized),
            SessionState::Anonymous => Err(ClientError::Anonymous),
            SessionState::Authenticated(session) => Ok(AuthContext {
                identity_id: session.identity_id.clone(),
                credential: session.credential.clone(),
                epoch: inner.epoch,
            }),
        }
    }

    /// True while the session `ctx` was taken from is still the current one.
    pub fn is_current(&self, ctx: &AuthContext) -> bool {
        self.epoch() == ctx.epoch
    }

    /// Errors unless `ctx` still describes the current session.
    pub fn ensure_current(&self, ctx: &AuthContext) -> Result<(), ClientError> {
        if self.is_current(ctx) {
            return Ok(());
        }
        match self.auth_context() {
            Err(e) => Err(e),
            Ok(_) => Err(ClientError::SessionExpired),
        }
    }

    /// Runs an authorized remote call with the request timeout applied.
    ///
    /// A `SessionExpired` result signs the session out, unless the call was
    /// issued under a session that has already been replaced.
    pub async fn guard<T, Fut>(&self, ctx: &AuthContext, call: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let result = self.bounded(call).await;
        if let Err(ClientError::SessionExpired) = &result {
            self.expire(ctx);
        }
        result
    }

    /// Forced sign-out after the backend rejected `ctx`'s credential.
    pub fn expire(&self, ctx: &AuthContext) {
        if !self.is_current(ctx) {
            debug!("Ignoring expiry reported for a previous session");
            return;
        }
        warn!("Credential for {} rejected; signing out", ctx.identity_id);
        self.forget_persisted();
        self.replace(None, Ending::Expired);
    }

    /// Keeps the session's embedded preferences in step with a successful commit.
    pub fn update_preferences_snapshot(&self, ctx: &AuthContext, preferences: &Preferences) {
        let persisted = {
            let mut inner = self.write();
            if inner.epoch != ctx.epoch {
                return;
            }
            match &mut inner.state {
                SessionState::Authenticated(session) => {
                    session.preferences = Some(preferences.clone());
                    PersistedCredential {
                        token: session.credential.clone(),
                        profile: Some(session.profile()),
                    }
                }
                _ => return,
            }
        };
        if let Err(e) = self.credentials.save(&persisted) {
            warn!("Failed to persist updated profile: {e:#}");
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Internals
    // ────────────────────────────────────────────────────────────────────────

    async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.request_timeout)),
        }
    }

    fn establish(&self, grant: AuthGrant) -> Session {
        let session = Session::new(grant.credential, grant.profile);
        let persisted = PersistedCredential {
            token: session.credential.clone(),
            profile: Some(session.profile()),
        };
        if let Err(e) = self.credentials.save(&persisted) {
            warn!("Failed to persist credential: {e:#}");
        }
        self.replace(Some(session.clone()), Ending::SignedOut);
        session
    }

    /// Finishes `initialize` unless someone signed in or out while it was validating.
    fn settle_initialize(&self, started_epoch: u64, session: Option<Session>) -> SessionStatus {
        {
            let mut inner = self.write();
            if inner.epoch != started_epoch {
                debug!("Session changed during initialize; keeping the newer state");
                drop(inner);
                return self.status();
            }
            if session.is_none() {
                if let SessionState::Uninitialized = inner.state {
                    inner.state = SessionState::Anonymous;
                    inner.epoch += 1;
                    return SessionStatus::Anonymous;
                }
            }
        }
        let authenticated = session.is_some();
        self.replace(session, Ending::SignedOut);
        if authenticated {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }

    /// Swaps the session and emits the resulting events after releasing the lock.
    fn replace(&self, next: Option<Session>, ending: Ending) {
        let (previous, next_identity) = {
            let mut inner = self.write();
            let previous = match &inner.state {
                SessionState::Authenticated(session) => Some(session.identity_id.clone()),
                _ => None,
            };
            let next_identity = next.as_ref().map(|s| s.identity_id.clone());
            inner.state = match next {
                Some(session) => SessionState::Authenticated(session),
                None => SessionState::Anonymous,
            };
            inner.epoch += 1;
            (previous, next_identity)
        };

        if let Some(identity_id) = previous {
            self.changes.emit(match ending {
                Ending::SignedOut => SessionEvent::SignedOut { identity_id },
                Ending::Expired => SessionEvent::Expired { identity_id },
            });
        }
        if let Some(identity_id) = next_identity {
            self.changes.emit(SessionEvent::SignedIn { identity_id });
        }
    }

    fn forget_persisted(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!("Failed to clear persisted credential: {e:#}");
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A 401 on login means bad credentials, not an expired session.
fn as_auth_error(e: ClientError) -> ClientError {
    match e {
        ClientError::SessionExpired => ClientError::Auth("Invalid email or password".to_string()),
        other => other,
    }
}
