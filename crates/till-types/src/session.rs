//! Session state and persisted credential types

use serde::{Deserialize, Serialize};

use crate::user::{UserId, UserProfile};

/// The externally observable session triple.
///
/// Invariant: `locked` is only ever true while a user is present. The
/// constructors and the coordinator's state handle uphold this; consumers
/// can rely on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub loading: bool,
    pub locked: bool,
}

impl SessionState {
    /// Established session for `user`; `locked` restores a persisted
    /// idle-lock across reloads.
    pub fn established(user: UserProfile, locked: bool) -> Self {
        Self {
            user: Some(user),
            loading: false,
            locked,
        }
    }

    /// No session; not loading, not locked.
    pub fn signed_out() -> Self {
        Self {
            user: None,
            loading: false,
            locked: false,
        }
    }
}

/// Persisted credential blob, read at startup for emergency recovery.
///
/// Matches the identity provider's storage shape exactly:
/// `{"access_token": "...", "user": {"id": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    pub user: StoredCredentialUser,
}

/// User reference inside the persisted credential blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentialUser {
    pub id: String,
}

/// Live session returned by the identity provider
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub user_id: UserId,
}
