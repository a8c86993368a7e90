//! Session coordinator
//!
//! The public face of the crate. Owns the bootstrap, the push-channel
//! watcher, and the idle-lock manager, and exposes session state through
//! a watch channel plus a broadcast channel of out-of-band notices.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use till_types::{SessionState, UserProfile};

use crate::backend::{
    AuthEvent, CredentialStore, DataBackend, IdentityProvider, LockFlagStore, Table,
};
use crate::bootstrap::{BootstrapPhase, EventOutcome, SessionBootstrapper};
use crate::config::SessionConfig;
use crate::error::{SessionError, UnlockError};
use crate::idle::IdleLockManager;
use crate::permissions;
use crate::profile::ProfileLoader;
use crate::realtime::{RealtimeWatcher, WatchSignal};
use crate::state::StateHandle;

/// Out-of-band notices for the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    /// The server forcibly ended this session; state is already cleared.
    ForceLogout,
}

/// Client-side session and authorization coordinator.
///
/// Cheap to clone; all clones share the same underlying session.
pub struct SessionCoordinator<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    inner: Arc<Inner<P, B>>,
}

impl<P, B> Clone for SessionCoordinator<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    provider: Arc<P>,
    backend: Arc<B>,
    credentials: Arc<dyn CredentialStore>,
    lock_flag: Arc<dyn LockFlagStore>,
    state: StateHandle,
    loader: Arc<ProfileLoader<B>>,
    bootstrapper: Arc<SessionBootstrapper<P, B>>,
    watcher: Arc<RealtimeWatcher<B>>,
    idle: Arc<IdleLockManager<B>>,
    notices: broadcast::Sender<SessionNotice>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchSignal>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<P, B> SessionCoordinator<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    pub fn new(
        provider: Arc<P>,
        backend: Arc<B>,
        credentials: Arc<dyn CredentialStore>,
        lock_flag: Arc<dyn LockFlagStore>,
        config: SessionConfig,
    ) -> Self {
        let state = StateHandle::new();
        let loader = Arc::new(ProfileLoader::new(Arc::clone(&backend), config.clone()));
        let bootstrapper = Arc::new(SessionBootstrapper::new(
            Arc::clone(&provider),
            Arc::clone(&loader),
            Arc::clone(&credentials),
            Arc::clone(&lock_flag),
            state.clone(),
            config.clone(),
        ));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let watcher = Arc::new(RealtimeWatcher::new(
            Arc::clone(&backend),
            state.clone(),
            signal_tx,
        ));
        let idle = Arc::new(IdleLockManager::new(
            Arc::clone(&backend),
            state.clone(),
            Arc::clone(&lock_flag),
            config,
        ));
        let (notices, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                provider,
                backend,
                credentials,
                lock_flag,
                state,
                loader,
                bootstrapper,
                watcher,
                idle,
                notices,
                signal_rx: Mutex::new(Some(signal_rx)),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Run the startup bootstrap and, if a session comes up, attach the
    /// push watches, presence, and idle policy.
    pub async fn start(&self) {
        if let Some(rx) = self.inner.signal_rx.lock().take() {
            *self.inner.pump.lock() = Some(Inner::spawn_pump(&self.inner, rx));
        }

        self.inner.bootstrapper.start().await;
        if self.inner.bootstrapper.phase() == BootstrapPhase::Established {
            self.inner.after_establish().await;
        }
    }

    /// Password login. Bad credentials surface verbatim as
    /// [`SessionError::Authentication`] and are never retried; an
    /// authenticated identity with no profile row is torn down and
    /// reported as [`SessionError::DataIntegrity`].
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let session = self
            .inner
            .provider
            .sign_in_with_password(email, password)
            .await?;

        let request_id = self.inner.bootstrapper.begin_attempt();
        match self
            .inner
            .loader
            .fetch(session.user_id, &session.access_token)
            .await
        {
            Ok(Some(profile)) => {
                if self
                    .inner
                    .bootstrapper
                    .commit(request_id, profile, &session.access_token)
                {
                    info!(user_id = %session.user_id, "login established session");
                    self.inner.after_establish().await;
                }
                Ok(())
            }
            Ok(None) => {
                warn!(user_id = %session.user_id, "login succeeded but no profile row exists");
                if let Err(e) = self.inner.provider.sign_out().await {
                    warn!(error = %e, "sign-out after missing profile failed");
                }
                self.inner.credentials.clear();
                self.inner.bootstrapper.clear_session();
                Err(SessionError::DataIntegrity)
            }
            Err(e) => {
                self.inner.bootstrapper.fail(request_id);
                Err(SessionError::Profile(e))
            }
        }
    }

    /// Explicit full logout: presence offline (best effort), provider
    /// sign-out, watches and timers torn down, durable flags cleared.
    pub async fn logout(&self) {
        self.inner.set_presence_offline().await;
        self.inner.watcher.teardown();
        self.inner.idle.disarm();
        if let Err(e) = self.inner.provider.sign_out().await {
            warn!(error = %e, "provider sign-out failed; clearing local session anyway");
        }
        self.inner.lock_flag.set_locked(false);
        self.inner.credentials.clear();
        self.inner.bootstrapper.clear_session();
        info!("logged out");
    }

    /// Forward a provider-pushed auth event.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match self.inner.bootstrapper.handle_auth_event(event).await {
            EventOutcome::Established => self.inner.after_establish().await,
            EventOutcome::Cleared => {
                self.inner.watcher.teardown();
                self.inner.idle.disarm();
                self.inner.lock_flag.set_locked(false);
                self.inner.credentials.clear();
            }
            EventOutcome::Ignored | EventOutcome::Failed => {}
        }
    }

    /// Capability query against the current session.
    /// No session means no capability.
    pub fn check_permission(&self, query: &str) -> bool {
        self.inner
            .state
            .snapshot()
            .user
            .map(|user| permissions::has_capability(&user, query))
            .unwrap_or(false)
    }

    /// Lock the screen now.
    pub fn lock_now(&self) {
        self.inner.idle.lock_screen();
    }

    /// Verify the secret and release the idle lock.
    pub async fn unlock(&self, secret: &str) -> Result<(), UnlockError> {
        let Some(token) = self.inner.bootstrapper.active_token() else {
            return Err(UnlockError::NoSession);
        };
        self.inner.idle.unlock(secret, &token).await
    }

    /// User activity signal for the idle timer; returns whether the timer
    /// was reset (throttled and out-of-session signals are not).
    pub fn record_activity(&self) -> bool {
        self.inner.idle.record_activity()
    }

    /// Subscribe to session-state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to out-of-band notices.
    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    /// Current state by value.
    pub fn state(&self) -> SessionState {
        self.inner.state.snapshot()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.state.snapshot().user
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.snapshot().loading
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state.snapshot().locked
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.inner.bootstrapper.phase()
    }

    /// Tear down background tasks and subscriptions. Session state is left
    /// as-is; this is shutdown, not logout.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.inner.watcher.teardown();
        self.inner.idle.disarm();
    }
}

impl<P, B> Inner<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    fn spawn_pump(
        inner: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<WatchSignal>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                match signal {
                    WatchSignal::ForceLogout => inner.force_logout().await,
                    WatchSignal::StoreChanged(settings) => inner.idle.arm(Some(&settings)),
                }
            }
        })
    }

    /// Post-establish wiring: presence, push watches, idle policy.
    async fn after_establish(&self) {
        // A replaced session must not keep the previous user's watches; an
        // old tenant's store pushes would otherwise keep mutating state.
        self.watcher.teardown();

        let Some(user) = self.state.snapshot().user else {
            return;
        };
        let Some(token) = self.bootstrapper.active_token() else {
            return;
        };
        let started = self
            .bootstrapper
            .session_started_at()
            .unwrap_or_else(Utc::now);

        // Presence is best effort; the session stands without it.
        if let Err(e) = self
            .backend
            .update_row(
                Table::Profiles,
                &user.id.to_string(),
                json!({"presence": "online"}),
                &token,
            )
            .await
        {
            warn!(error = %e, "presence update failed");
        }

        self.watcher.watch_profile(user.id, started).await;
        if let Some(store_id) = user.store_id {
            self.watcher.watch_store(store_id).await;
        }

        let settings = user.store.as_ref().map(|s| s.settings.clone());
        self.idle.arm(settings.as_ref());
    }

    async fn set_presence_offline(&self) {
        let snapshot = self.state.snapshot();
        if let (Some(user), Some(token)) = (snapshot.user, self.bootstrapper.active_token()) {
            if let Err(e) = self
                .backend
                .update_row(
                    Table::Profiles,
                    &user.id.to_string(),
                    json!({"presence": "offline"}),
                    &token,
                )
                .await
            {
                warn!(error = %e, "presence offline update failed");
            }
        }
    }

    /// Server-demanded teardown, raised by the profile watch.
    async fn force_logout(&self) {
        warn!("executing server-forced logout");
        self.watcher.teardown();
        self.idle.disarm();
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "sign-out during forced logout failed");
        }
        self.lock_flag.set_locked(false);
        self.credentials.clear();
        self.bootstrapper.clear_session();
        let _ = self.notices.send(SessionNotice::ForceLogout);
    }
}

impl<P, B> std::fmt::Debug for SessionCoordinator<P, B>
where
    P: IdentityProvider + 'static,
    B: DataBackend + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("phase", &self.inner.bootstrapper.phase())
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}
