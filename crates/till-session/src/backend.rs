//! Backend contracts
//!
//! Async trait seams for the external collaborators: the identity provider,
//! the row/data service with its push channel, and the two small pieces of
//! durable client-side storage (persisted credential blob, idle-lock flag).
//!
//! The coordinator only ever sees these traits; tests inject in-memory
//! implementations.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use till_types::{AuthSession, StoredCredential, UserId};

use crate::retry::RetryableError;

/// Tables the coordinator reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Stores,
    Users,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Stores => "stores",
            Self::Users => "users",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-update event delivered on a push channel.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub table: Table,
    pub id: String,
    pub payload: serde_json::Value,
}

/// Callback invoked for every row-update event on a subscription.
pub type ChangeCallback = Arc<dyn Fn(RowChange) + Send + Sync>;

/// Owned unsubscribe handle for a push subscription.
///
/// Dropping the handle releases the subscription; `unsubscribe` does the
/// same explicitly. Either way the release happens exactly once.
pub struct SubscriptionHandle {
    channel: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(channel: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            release: Some(Box::new(release)),
        }
    }

    /// The channel name this handle is bound to (e.g. `store-{id}`).
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Auth-provider pushed event, forwarded into the coordinator by the host.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn {
        user_id: UserId,
        access_token: String,
        /// A hard refresh forces a reload even for the already-current user.
        hard_refresh: bool,
    },
    TokenRefreshed {
        user_id: UserId,
        access_token: String,
    },
    SignedOut,
}

/// Backend failures, classified for retry decisions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Request exceeded its time bound.
    #[error("request timed out")]
    Timeout,

    /// Request was aborted before completing.
    #[error("request aborted")]
    Aborted,

    /// Bad credentials; message is surfaced verbatim to the caller.
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// Anything else.
    #[error("backend failure: {0}")]
    Other(String),
}

impl BackendError {
    /// Transient errors (abort/timeout signatures) are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Aborted)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl RetryableError for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Identity provider contract.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, if the provider holds one.
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError>;

    /// Password sign-in. Bad credentials come back as
    /// [`BackendError::Unauthenticated`] and are never retried.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError>;

    /// Terminate the provider-side session.
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Row/data service contract, including the push channel.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Read a single row by id, authenticated with the given bearer token.
    /// A missing row is `Ok(None)`, not an error.
    async fn get_row(
        &self,
        table: Table,
        id: &str,
        access_token: &str,
    ) -> Result<Option<serde_json::Value>, BackendError>;

    /// Patch a row by id.
    async fn update_row(
        &self,
        table: Table,
        id: &str,
        patch: serde_json::Value,
        access_token: &str,
    ) -> Result<(), BackendError>;

    /// Subscribe to row-update events for a single row. The channel name
    /// scopes the subscription (`store-{id}`, `profile-{id}`).
    async fn subscribe(
        &self,
        channel: &str,
        table: Table,
        id: &str,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, BackendError>;
}

/// Persisted credential blob, read at startup for emergency recovery.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<StoredCredential>;
    fn clear(&self);
}

/// Durable idle-lock flag (`is_app_locked`), scoped to the browser session
/// so a reload does not silently unlock. Cleared on explicit full logout.
pub trait LockFlagStore: Send + Sync {
    fn is_locked(&self) -> bool;
    fn set_locked(&self, locked: bool);
}
