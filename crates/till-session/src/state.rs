//! Shared session state cell
//!
//! The one authoritative copy of [`SessionState`], published through a
//! `tokio::sync::watch` channel. Mutation goes through the handle's
//! crate-private methods so the `locked implies user` invariant holds at
//! every observable point.

use std::sync::Arc;

use tokio::sync::watch;

use till_types::{ProfilePatch, SessionState, Store, UserProfile};

/// Cloneable handle to the session state cell.
#[derive(Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::signed_out());
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Current state by value.
    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|state| state.loading = loading);
    }

    /// Install an established session. `locked` restores a persisted
    /// idle-lock across reloads.
    pub(crate) fn establish(&self, user: UserProfile, locked: bool) {
        self.tx
            .send_modify(|state| *state = SessionState::established(user, locked));
    }

    /// Clear to signed-out: no user, not loading, not locked.
    pub(crate) fn clear(&self) {
        self.tx.send_modify(|state| *state = SessionState::signed_out());
    }

    /// Set the lock flag. Locking without a user is refused (invariant);
    /// returns whether the transition was applied.
    pub(crate) fn set_locked(&self, locked: bool) -> bool {
        let mut applied = false;
        self.tx.send_modify(|state| {
            if locked && state.user.is_none() {
                return;
            }
            if state.locked != locked {
                state.locked = locked;
                applied = true;
            }
        });
        applied
    }

    /// Shallow-merge a push payload into the current profile, if any.
    pub(crate) fn merge_profile(&self, patch: &ProfilePatch) {
        self.tx.send_modify(|state| {
            if let Some(user) = &mut state.user {
                user.apply_patch(patch);
            }
        });
    }

    /// Replace the attached store wholesale (last-write-wins, no merge).
    pub(crate) fn replace_store(&self, store: Store) {
        self.tx.send_modify(|state| {
            if let Some(user) = &mut state.user {
                user.store = Some(store);
            }
        });
    }
}

impl std::fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.tx.borrow();
        f.debug_struct("StateHandle")
            .field("has_user", &state.user.is_some())
            .field("loading", &state.loading)
            .field("locked", &state.locked)
            .finish()
    }
}
