//! Session bootstrap
//!
//! Recovers or establishes a session at startup and on auth-provider
//! events. Every attempt is tagged with a monotonically increasing request
//! id; a resolving attempt only commits if it is still the most recent,
//! with one exception: when no session exists at all, a stale-but-
//! successful result is accepted so the UI is never stuck sessionless
//! waiting for an attempt that already lost the race.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use till_types::{UserId, UserProfile};

use crate::backend::{
    AuthEvent, BackendError, CredentialStore, DataBackend, IdentityProvider, LockFlagStore,
};
use crate::config::SessionConfig;
use crate::profile::ProfileLoader;
use crate::retry::BackoffPolicy;
use crate::state::StateHandle;
use crate::token;

/// Bootstrap lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Unstarted,
    Recovering,
    Established,
    Unauthenticated,
    Failed,
}

/// Outcome of an auth-provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Redundant event for the already-current user; nothing changed.
    Ignored,
    /// Session cleared (signed out).
    Cleared,
    /// A session was (re)established.
    Established,
    /// The attempt did not produce a session.
    Failed,
}

/// Bootstraps and arbitrates the session.
pub struct SessionBootstrapper<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    provider: Arc<P>,
    loader: Arc<ProfileLoader<B>>,
    credentials: Arc<dyn CredentialStore>,
    lock_flag: Arc<dyn LockFlagStore>,
    state: StateHandle,
    config: SessionConfig,
    /// Monotonic attempt counter; the current value is the latest issued id.
    request_counter: AtomicU64,
    /// Whether the latest attempt has completed (success, failure, or
    /// unauthenticated); consulted by the watchdog.
    attempt_completed: AtomicBool,
    phase: Mutex<BootstrapPhase>,
    session_started_at: Mutex<Option<DateTime<Utc>>>,
    active_token: Mutex<Option<String>>,
}

impl<P, B> SessionBootstrapper<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    pub fn new(
        provider: Arc<P>,
        loader: Arc<ProfileLoader<B>>,
        credentials: Arc<dyn CredentialStore>,
        lock_flag: Arc<dyn LockFlagStore>,
        state: StateHandle,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            loader,
            credentials,
            lock_flag,
            state,
            config,
            request_counter: AtomicU64::new(0),
            attempt_completed: AtomicBool::new(false),
            phase: Mutex::new(BootstrapPhase::Unstarted),
            session_started_at: Mutex::new(None),
            active_token: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        *self.phase.lock()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Timestamp of the current session's establishment.
    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        *self.session_started_at.lock()
    }

    /// Bearer token of the current session.
    pub(crate) fn active_token(&self) -> Option<String> {
        self.active_token.lock().clone()
    }

    /// Run the startup bootstrap: emergency recovery from the persisted
    /// credential first, then the identity provider's own session.
    pub async fn start(self: &Arc<Self>) {
        let request_id = self.begin_attempt();
        self.arm_watchdog(request_id);

        if self.try_emergency_recovery(request_id).await {
            info!("session recovered from persisted credential");
            return;
        }

        // A newer attempt may have superseded us while recovery ran.
        if self.request_counter.load(Ordering::SeqCst) != request_id {
            debug!("bootstrap attempt superseded during recovery");
            return;
        }

        self.provider_path(request_id).await;
    }

    /// Provider-pushed event entry point.
    pub async fn handle_auth_event(self: &Arc<Self>, event: AuthEvent) -> EventOutcome {
        match event {
            AuthEvent::SignedOut => {
                info!("provider reports signed out; clearing session");
                self.clear_session();
                EventOutcome::Cleared
            }
            AuthEvent::SignedIn {
                user_id,
                access_token,
                hard_refresh,
            } => self.refresh(user_id, access_token, hard_refresh).await,
            AuthEvent::TokenRefreshed {
                user_id,
                access_token,
            } => self.refresh(user_id, access_token, false).await,
        }
    }

    async fn refresh(
        self: &Arc<Self>,
        user_id: UserId,
        access_token: String,
        hard_refresh: bool,
    ) -> EventOutcome {
        let current = self.state.snapshot().user.map(|u| u.id);
        if !hard_refresh && current == Some(user_id) {
            debug!(%user_id, "ignoring redundant auth event for current user");
            // The token itself may have rotated; keep it fresh.
            *self.active_token.lock() = Some(access_token);
            return EventOutcome::Ignored;
        }

        let request_id = self.begin_attempt();
        self.arm_watchdog(request_id);
        if self.load_and_commit(request_id, user_id, &access_token).await {
            EventOutcome::Established
        } else {
            EventOutcome::Failed
        }
    }

    /// Read the persisted credential blob and, if its token is still
    /// valid, load the profile with it directly, bypassing the provider's
    /// session handshake. Any failure falls through to the normal path.
    async fn try_emergency_recovery(&self, request_id: u64) -> bool {
        let Some(credential) = self.credentials.load() else {
            return false;
        };
        if token::is_expired(&credential.access_token) {
            debug!("persisted credential is expired");
            return false;
        }
        let Ok(user_id) = UserId::parse(&credential.user.id) else {
            warn!("persisted credential carries an unparseable user id");
            return false;
        };

        match self.loader.fetch(user_id, &credential.access_token).await {
            Ok(Some(profile)) => self.commit(request_id, profile, &credential.access_token),
            Ok(None) => {
                debug!("persisted credential has no profile row; falling back");
                false
            }
            Err(e) => {
                debug!(error = %e, "emergency recovery failed; falling back");
                false
            }
        }
    }

    async fn provider_path(self: &Arc<Self>, request_id: u64) {
        let session = match self.check_session_with_retry().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "session check failed after exhausting retries");
                self.fail(request_id);
                return;
            }
        };

        let Some(session) = session else {
            self.finish_unauthenticated(request_id);
            return;
        };

        self.load_and_commit(request_id, session.user_id, &session.access_token)
            .await;
    }

    /// Session check with the dual retry schedule: aborts escalate
    /// linearly, everything else retries on a flat delay. Both budgets are
    /// bounded; exhaustion propagates the last error.
    async fn check_session_with_retry(
        &self,
    ) -> Result<Option<till_types::AuthSession>, BackendError> {
        let abort_policy = BackoffPolicy::session_check_abort();
        let flat_policy = BackoffPolicy::session_check_flat();
        let mut abort_attempts = 0u32;
        let mut other_attempts = 0u32;

        loop {
            match self.provider.get_session().await {
                Ok(session) => return Ok(session),
                Err(err) if err.is_aborted() => {
                    if !abort_policy.can_retry(abort_attempts) {
                        return Err(err);
                    }
                    let delay = abort_policy.delay_for_attempt(abort_attempts);
                    warn!(attempt = abort_attempts + 1, delay_ms = delay.as_millis() as u64, "session check aborted; retrying");
                    sleep(delay).await;
                    abort_attempts += 1;
                }
                Err(err) => {
                    if !flat_policy.can_retry(other_attempts) {
                        return Err(err);
                    }
                    let delay = flat_policy.delay_for_attempt(other_attempts);
                    warn!(attempt = other_attempts + 1, error = %err, "session check failed; retrying");
                    sleep(delay).await;
                    other_attempts += 1;
                }
            }
        }
    }

    /// Fetch the profile and commit it. An authenticated identity with no
    /// profile row tears the session down instead of leaving it half
    /// initialized.
    pub(crate) async fn load_and_commit(
        &self,
        request_id: u64,
        user_id: UserId,
        access_token: &str,
    ) -> bool {
        match self.loader.fetch(user_id, access_token).await {
            Ok(Some(profile)) => {
                if self.commit(request_id, profile, access_token) {
                    true
                } else {
                    debug!(request_id, "bootstrap result discarded as stale");
                    false
                }
            }
            Ok(None) => {
                warn!(%user_id, "authenticated identity has no profile row; signing out");
                if let Err(e) = self.provider.sign_out().await {
                    warn!(error = %e, "sign-out after missing profile failed");
                }
                self.credentials.clear();
                self.clear_session();
                *self.phase.lock() = BootstrapPhase::Failed;
                false
            }
            Err(e) => {
                error!(error = %e, "profile fetch failed terminally");
                self.fail(request_id);
                false
            }
        }
    }

    /// Start a new attempt: bump the request counter and raise `loading`.
    pub(crate) fn begin_attempt(&self) -> u64 {
        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempt_completed.store(false, Ordering::SeqCst);
        *self.phase.lock() = BootstrapPhase::Recovering;
        self.state.set_loading(true);
        request_id
    }

    /// Commit a loaded profile under request-id arbitration.
    pub(crate) fn commit(&self, request_id: u64, profile: UserProfile, access_token: &str) -> bool {
        let latest = self.request_counter.load(Ordering::SeqCst);
        let has_user = self.state.snapshot().user.is_some();
        if request_id != latest && has_user {
            debug!(request_id, latest, "discarding stale session result");
            return false;
        }
        if request_id != latest {
            // No session exists, so a stale success is still better than
            // leaving the client sessionless.
            warn!(request_id, latest, "accepting stale session result into empty state");
        }

        *self.active_token.lock() = Some(access_token.to_string());
        *self.session_started_at.lock() = Some(Utc::now());
        let locked = self.lock_flag.is_locked();
        self.state.establish(profile, locked);
        *self.phase.lock() = BootstrapPhase::Established;
        self.attempt_completed.store(true, Ordering::SeqCst);
        true
    }

    /// Clear to signed-out and complete the current attempt.
    pub(crate) fn clear_session(&self) {
        *self.active_token.lock() = None;
        *self.session_started_at.lock() = None;
        *self.phase.lock() = BootstrapPhase::Unauthenticated;
        self.attempt_completed.store(true, Ordering::SeqCst);
        self.state.clear();
    }

    pub(crate) fn fail(&self, request_id: u64) {
        if self.request_counter.load(Ordering::SeqCst) != request_id {
            return;
        }
        *self.phase.lock() = BootstrapPhase::Failed;
        self.attempt_completed.store(true, Ordering::SeqCst);
        self.state.set_loading(false);
    }

    fn finish_unauthenticated(&self, request_id: u64) {
        if self.request_counter.load(Ordering::SeqCst) != request_id {
            return;
        }
        *self.phase.lock() = BootstrapPhase::Unauthenticated;
        self.attempt_completed.store(true, Ordering::SeqCst);
        self.state.set_loading(false);
    }

    /// Watchdog that forcibly releases `loading` if this attempt neither
    /// completes nor is superseded within the configured bound. Fail-open:
    /// a slow network may briefly present as signed out.
    fn arm_watchdog(self: &Arc<Self>, request_id: u64) {
        let this = Arc::clone(self);
        let deadline = self.config.bootstrap_watchdog;
        tokio::spawn(async move {
            sleep(deadline).await;
            let still_latest = this.request_counter.load(Ordering::SeqCst) == request_id;
            let completed = this.attempt_completed.load(Ordering::SeqCst);
            if still_latest && !completed && this.state.snapshot().loading {
                warn!(request_id, "bootstrap watchdog fired; releasing loading flag");
                this.state.set_loading(false);
            }
        });
    }
}

impl<P, B> std::fmt::Debug for SessionBootstrapper<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBootstrapper")
            .field("phase", &self.phase())
            .field(
                "latest_request",
                &self.request_counter.load(Ordering::SeqCst),
            )
            .finish_non_exhaustive()
    }
}
