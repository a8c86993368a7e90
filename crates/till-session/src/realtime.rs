//! Push-channel watcher
//!
//! Keeps one subscription per scope (the session user's profile row, and
//! the attached store row) and folds incoming payloads into session state.
//! A profile payload whose forced-logout timestamp postdates the current
//! session raises [`WatchSignal::ForceLogout`] instead, exactly once per
//! session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use till_types::{ProfilePatch, Store, StoreId, StoreSettings, UserId};

use crate::backend::{DataBackend, SubscriptionHandle, Table};
use crate::state::StateHandle;

/// Out-of-band events the watcher raises for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchSignal {
    /// The server demanded this session end.
    ForceLogout,
    /// The store row changed; carries the fresh settings so the idle
    /// policy can be re-armed.
    StoreChanged(StoreSettings),
}

/// Watches the profile and store rows over the backend's push channel.
pub struct RealtimeWatcher<B: DataBackend + 'static> {
    backend: Arc<B>,
    state: StateHandle,
    signals: mpsc::UnboundedSender<WatchSignal>,
    store_sub: Mutex<Option<SubscriptionHandle>>,
    profile_sub: Mutex<Option<SubscriptionHandle>>,
    /// Force logout is edge-triggered: repeated pushes with the same
    /// timestamp must not fire twice for one session.
    force_logout_fired: AtomicBool,
}

impl<B: DataBackend + 'static> RealtimeWatcher<B> {
    pub fn new(
        backend: Arc<B>,
        state: StateHandle,
        signals: mpsc::UnboundedSender<WatchSignal>,
    ) -> Self {
        Self {
            backend,
            state,
            signals,
            store_sub: Mutex::new(None),
            profile_sub: Mutex::new(None),
            force_logout_fired: AtomicBool::new(false),
        }
    }

    /// Subscribe to the store row, replacing any previous store watch.
    /// Payloads replace the in-state store wholesale (last write wins).
    pub async fn watch_store(&self, store_id: StoreId) {
        let channel = format!("store-{store_id}");
        let state = self.state.clone();
        let signals = self.signals.clone();

        let callback = Arc::new(move |change: crate::backend::RowChange| {
            match serde_json::from_value::<Store>(change.payload) {
                Ok(store) => {
                    let settings = store.settings.clone();
                    state.replace_store(store);
                    let _ = signals.send(WatchSignal::StoreChanged(settings));
                }
                Err(e) => warn!(error = %e, "ignoring malformed store payload"),
            }
        });

        match self
            .backend
            .subscribe(&channel, Table::Stores, &store_id.to_string(), callback)
            .await
        {
            Ok(handle) => {
                debug!(%store_id, "watching store row");
                // Replacing the slot drops (and releases) the old handle.
                *self.store_sub.lock() = Some(handle);
            }
            Err(e) => warn!(%store_id, error = %e, "store subscription failed"),
        }
    }

    /// Subscribe to the session user's profile row, replacing any previous
    /// profile watch and re-arming the force-logout edge for the new
    /// session.
    pub async fn watch_profile(
        self: &Arc<Self>,
        user_id: UserId,
        session_started_at: DateTime<Utc>,
    ) {
        self.force_logout_fired.store(false, Ordering::SeqCst);

        let channel = format!("profile-{user_id}");
        let this = Arc::clone(self);

        let callback = Arc::new(move |change: crate::backend::RowChange| {
            match serde_json::from_value::<ProfilePatch>(change.payload) {
                Ok(patch) => this.apply_profile_patch(patch, session_started_at),
                Err(e) => warn!(error = %e, "ignoring malformed profile payload"),
            }
        });

        match self
            .backend
            .subscribe(&channel, Table::Profiles, &user_id.to_string(), callback)
            .await
        {
            Ok(handle) => {
                debug!(%user_id, "watching profile row");
                *self.profile_sub.lock() = Some(handle);
            }
            Err(e) => warn!(%user_id, error = %e, "profile subscription failed"),
        }
    }

    fn apply_profile_patch(&self, patch: ProfilePatch, session_started_at: DateTime<Utc>) {
        if let Some(logout_at) = patch.last_force_logout_at {
            if logout_at > session_started_at {
                if !self.force_logout_fired.swap(true, Ordering::SeqCst) {
                    warn!(%logout_at, "forced logout pushed from server");
                    let _ = self.signals.send(WatchSignal::ForceLogout);
                }
                return;
            }
        }
        self.state.merge_profile(&patch);
    }

    /// Drop all subscriptions, releasing them.
    pub fn teardown(&self) {
        self.store_sub.lock().take();
        self.profile_sub.lock().take();
        self.force_logout_fired.store(false, Ordering::SeqCst);
    }
}

impl<B: DataBackend + 'static> std::fmt::Debug for RealtimeWatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeWatcher")
            .field("store_watch", &self.store_sub.lock().is_some())
            .field("profile_watch", &self.profile_sub.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;

    use till_types::{PresenceStatus, Role, UserProfile};

    use crate::backend::{BackendError, ChangeCallback, RowChange};

    /// Backend that records subscriptions so tests can push payloads.
    #[derive(Default)]
    struct PushBackend {
        callbacks: Mutex<Vec<(String, Table, String, ChangeCallback)>>,
    }

    impl PushBackend {
        fn push(&self, channel: &str, payload: serde_json::Value) {
            let callbacks = self.callbacks.lock();
            for (chan, table, id, callback) in callbacks.iter() {
                if chan == channel {
                    callback(RowChange {
                        table: *table,
                        id: id.clone(),
                        payload: payload.clone(),
                    });
                }
            }
        }
    }

    #[async_trait]
    impl DataBackend for PushBackend {
        async fn get_row(
            &self,
            _table: Table,
            _id: &str,
            _access_token: &str,
        ) -> Result<Option<serde_json::Value>, BackendError> {
            Ok(None)
        }

        async fn update_row(
            &self,
            _table: Table,
            _id: &str,
            _patch: serde_json::Value,
            _access_token: &str,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            channel: &str,
            table: Table,
            id: &str,
            on_change: ChangeCallback,
        ) -> Result<SubscriptionHandle, BackendError> {
            self.callbacks
                .lock()
                .push((channel.to_string(), table, id.to_string(), on_change));
            Ok(SubscriptionHandle::new(channel, || {}))
        }
    }

    fn user(id: UserId) -> UserProfile {
        UserProfile {
            id,
            display_name: Some("before".to_string()),
            role: Role::Staff,
            permissions: Default::default(),
            store_id: None,
            store: None,
            presence: PresenceStatus::Online,
            last_force_logout_at: None,
        }
    }

    fn watcher(
        backend: Arc<PushBackend>,
        state: StateHandle,
    ) -> (
        Arc<RealtimeWatcher<PushBackend>>,
        mpsc::UnboundedReceiver<WatchSignal>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RealtimeWatcher::new(backend, state, tx)), rx)
    }

    #[tokio::test]
    async fn test_profile_patch_merges_into_state() {
        let backend = Arc::new(PushBackend::default());
        let state = StateHandle::new();
        let user_id = UserId::new();
        state.establish(user(user_id), false);

        let (watcher, _rx) = watcher(Arc::clone(&backend), state.clone());
        watcher.watch_profile(user_id, Utc::now()).await;

        backend.push(
            &format!("profile-{user_id}"),
            json!({"display_name": "after"}),
        );

        let snapshot = state.snapshot().user.unwrap();
        assert_eq!(snapshot.display_name.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_force_logout_fires_once_for_newer_timestamp() {
        let backend = Arc::new(PushBackend::default());
        let state = StateHandle::new();
        let user_id = UserId::new();
        state.establish(user(user_id), false);

        let started = Utc::now();
        let (watcher, mut rx) = watcher(Arc::clone(&backend), state.clone());
        watcher.watch_profile(user_id, started).await;

        let newer = started + Duration::seconds(5);
        let payload = json!({"last_force_logout_at": newer.to_rfc3339()});
        backend.push(&format!("profile-{user_id}"), payload.clone());
        backend.push(&format!("profile-{user_id}"), payload);

        assert_eq!(rx.try_recv().ok(), Some(WatchSignal::ForceLogout));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_old_force_logout_timestamp_ignored() {
        let backend = Arc::new(PushBackend::default());
        let state = StateHandle::new();
        let user_id = UserId::new();
        state.establish(user(user_id), false);

        let started = Utc::now();
        let (watcher, mut rx) = watcher(Arc::clone(&backend), state.clone());
        watcher.watch_profile(user_id, started).await;

        let older = started - Duration::minutes(10);
        backend.push(
            &format!("profile-{user_id}"),
            json!({"last_force_logout_at": older.to_rfc3339()}),
        );

        assert!(rx.try_recv().is_err());
        // Still a session
        assert!(state.snapshot().user.is_some());
    }

    #[tokio::test]
    async fn test_store_payload_replaces_store_and_signals() {
        let backend = Arc::new(PushBackend::default());
        let state = StateHandle::new();
        let user_id = UserId::new();
        state.establish(user(user_id), false);

        let (watcher, mut rx) = watcher(Arc::clone(&backend), state.clone());
        let store_id = StoreId::new();
        watcher.watch_store(store_id).await;

        backend.push(
            &format!("store-{store_id}"),
            json!({
                "id": store_id.to_string(),
                "name": "Main Street",
                "settings": {"auto_lock_enabled": true, "auto_lock_minutes": 5}
            }),
        );

        let store = state.snapshot().user.unwrap().store.unwrap();
        assert_eq!(store.name.as_deref(), Some("Main Street"));
        match rx.try_recv() {
            Ok(WatchSignal::StoreChanged(settings)) => {
                assert!(settings.auto_lock_enabled);
                assert_eq!(settings.auto_lock_minutes, Some(5));
            }
            other => panic!("expected StoreChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_ignored() {
        let backend = Arc::new(PushBackend::default());
        let state = StateHandle::new();
        let user_id = UserId::new();
        state.establish(user(user_id), false);

        let (watcher, _rx) = watcher(Arc::clone(&backend), state.clone());
        watcher.watch_profile(user_id, Utc::now()).await;

        backend.push(&format!("profile-{user_id}"), json!("not an object"));
        assert_eq!(
            state.snapshot().user.unwrap().display_name.as_deref(),
            Some("before")
        );
    }
}
