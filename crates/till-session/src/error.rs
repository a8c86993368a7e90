//! Session errors
//!
//! Error taxonomy for the coordinator: transient network failures are
//! retried by the owning component, authentication failures surface
//! verbatim, and a missing profile row for an authenticated identity is
//! fatal for that session.

use thiserror::Error;

use crate::backend::BackendError;
use crate::retry::RetryableError;

/// Terminal session errors surfaced to callers of the coordinator.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Bad credentials; surfaced verbatim and never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Authenticated identity has no profile row; the session is torn
    /// down rather than left half-initialized.
    #[error("no profile row for authenticated user")]
    DataIntegrity,

    /// Profile fetch failed after exhausting its retry budget.
    #[error("profile fetch failed: {0}")]
    Profile(#[from] ProfileFetchError),

    /// Backend failure outside the profile-fetch path.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// An operation that needs an established session was called without one.
    #[error("no active session")]
    NoSession,
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated(message) => Self::Authentication(message),
            other => Self::Backend(other),
        }
    }
}

/// Profile loader errors.
///
/// `Clone` because an in-flight fetch is shared between coalesced callers,
/// all of whom observe the same settled result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileFetchError {
    /// Request exceeded its time bound.
    #[error("profile request timed out")]
    Timeout,

    /// Request was aborted before completing.
    #[error("profile request aborted")]
    Aborted,

    /// The row came back but could not be decoded.
    #[error("malformed profile row: {0}")]
    Malformed(String),

    /// Non-transient backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl RetryableError for ProfileFetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Aborted)
    }
}

impl From<BackendError> for ProfileFetchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout => Self::Timeout,
            BackendError::Aborted => Self::Aborted,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Idle-lock unlock failures.
#[derive(Error, Debug)]
pub enum UnlockError {
    /// No user is present; there is nothing to unlock.
    #[error("no active session")]
    NoSession,

    /// The provided secret does not match the stored credential.
    #[error("secret does not match")]
    BadSecret,

    /// The verification call itself failed; lock state is unchanged.
    #[error("could not verify secret: {0}")]
    VerifyFailed(String),
}
