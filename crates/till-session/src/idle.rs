//! Idle lock
//!
//! Arms a single idle timer from the store's auto-lock policy, throttles
//! activity-driven resets, and verifies unlock secrets against the user's
//! credential fetched fresh from the backend. The lock flag is mirrored to
//! durable storage so a reload comes back locked.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use till_types::StoreSettings;

use crate::backend::{DataBackend, LockFlagStore, Table};
use crate::config::SessionConfig;
use crate::error::UnlockError;
use crate::state::StateHandle;

/// Owns the idle timer and the lock/unlock transitions.
pub struct IdleLockManager<B: DataBackend + 'static> {
    backend: Arc<B>,
    state: StateHandle,
    lock_flag: Arc<dyn LockFlagStore>,
    config: SessionConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
    last_activity: Mutex<Option<Instant>>,
}

impl<B: DataBackend + 'static> IdleLockManager<B> {
    pub fn new(
        backend: Arc<B>,
        state: StateHandle,
        lock_flag: Arc<dyn LockFlagStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            state,
            lock_flag,
            config,
            timer: Mutex::new(None),
            last_activity: Mutex::new(None),
        }
    }

    /// Idle duration the given settings ask for, or `None` when auto-lock
    /// is switched off. Absent settings fall back to the default duration.
    fn lock_duration(&self, settings: Option<&StoreSettings>) -> Option<Duration> {
        match settings {
            Some(s) if !s.auto_lock_enabled => None,
            Some(s) => Some(
                s.auto_lock_minutes
                    .map(|m| Duration::from_secs(u64::from(m) * 60))
                    .unwrap_or(self.config.default_lock_duration),
            ),
            None => Some(self.config.default_lock_duration),
        }
    }

    /// (Re)arm the idle timer under the given policy. Replaces any pending
    /// timer; a disabled policy just disarms.
    pub fn arm(self: &Arc<Self>, settings: Option<&StoreSettings>) {
        let Some(duration) = self.lock_duration(settings) else {
            debug!("auto-lock disabled; disarming idle timer");
            self.disarm();
            return;
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(duration).await;
            this.lock_screen();
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any pending idle timer.
    pub fn disarm(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        *self.last_activity.lock() = None;
    }

    /// User activity signal. Resets the idle timer, at most once per
    /// throttle window; returns whether the timer was actually reset.
    /// Activity while locked or signed out is ignored.
    pub fn record_activity(self: &Arc<Self>) -> bool {
        let snapshot = self.state.snapshot();
        let Some(user) = &snapshot.user else {
            return false;
        };
        if snapshot.locked {
            return false;
        }

        let now = Instant::now();
        {
            let mut last = self.last_activity.lock();
            if last.is_some_and(|at| now.duration_since(at) < self.config.activity_throttle) {
                return false;
            }
            *last = Some(now);
        }

        let settings = user.store.as_ref().map(|s| s.settings.clone());
        self.arm(settings.as_ref());
        true
    }

    /// Lock now. No-op without a user or when already locked.
    pub fn lock_screen(&self) {
        if self.state.set_locked(true) {
            info!("idle lock engaged");
            self.lock_flag.set_locked(true);
        }
    }

    /// Verify `secret` against the user's credential row and unlock.
    ///
    /// The credential is fetched fresh rather than trusted from any cached
    /// copy. A mismatch leaves the lock untouched.
    pub async fn unlock(
        self: &Arc<Self>,
        secret: &str,
        access_token: &str,
    ) -> Result<(), UnlockError> {
        let Some(user) = self.state.snapshot().user else {
            return Err(UnlockError::NoSession);
        };

        let row = self
            .backend
            .get_row(Table::Users, &user.id.to_string(), access_token)
            .await
            .map_err(|e| UnlockError::VerifyFailed(e.to_string()))?
            .ok_or_else(|| UnlockError::VerifyFailed("credential row missing".to_string()))?;

        if !secret_matches(&row, secret) {
            warn!("unlock attempt with wrong secret");
            return Err(UnlockError::BadSecret);
        }

        self.state.set_locked(false);
        self.lock_flag.set_locked(false);
        info!("idle lock released");

        let settings = user.store.as_ref().map(|s| s.settings.clone());
        self.arm(settings.as_ref());
        Ok(())
    }
}

/// Constant-time comparison of the offered secret against the row's
/// credential fields (PIN preferred, password as fallback).
fn secret_matches(row: &serde_json::Value, secret: &str) -> bool {
    ["pin", "password"]
        .iter()
        .filter_map(|field| row.get(*field).and_then(|v| v.as_str()))
        .any(|stored| stored.as_bytes().ct_eq(secret.as_bytes()).into())
}

impl<B: DataBackend + 'static> std::fmt::Debug for IdleLockManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleLockManager")
            .field("armed", &self.timer.lock().is_some())
            .finish_non_exhaustive()
    }
}
