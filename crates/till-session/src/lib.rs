//! Till Session - client-side session and authorization coordinator
//!
//! Bootstraps a user session from a persisted credential, keeps it
//! consistent under concurrent initialization paths, reacts to
//! server-pushed changes (forced logout, store-settings sync), enforces the
//! idle-lock policy, and resolves role capability declarations into
//! concrete access decisions.
//!
//! The coordinator is an explicitly constructed, owned object: all backend
//! collaborators (identity provider, row store, credential and lock-flag
//! storage) are injected as traits, and subscriptions and timers are torn
//! down through [`SessionCoordinator::shutdown`].

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod idle;
pub mod permissions;
pub mod profile;
pub mod realtime;
pub mod retry;
pub mod state;
pub mod token;

pub use backend::{
    AuthEvent, BackendError, ChangeCallback, CredentialStore, DataBackend, IdentityProvider,
    LockFlagStore, RowChange, SubscriptionHandle, Table,
};
pub use bootstrap::{BootstrapPhase, EventOutcome};
pub use config::SessionConfig;
pub use coordinator::{SessionCoordinator, SessionNotice};
pub use error::{ProfileFetchError, SessionError, UnlockError};
pub use state::StateHandle;
