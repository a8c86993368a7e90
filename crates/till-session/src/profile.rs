//! Profile loading
//!
//! Two-step fetch of the authenticated identity: the profile row by id,
//! then the store row it references. Concurrent callers for the same
//! credential share one in-flight fetch; transient failures are retried
//! under [`BackoffPolicy::profile_fetch`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use till_types::{Store, UserId, UserProfile};

use crate::backend::{DataBackend, Table};
use crate::config::SessionConfig;
use crate::error::ProfileFetchError;
use crate::permissions;
use crate::retry::{with_retry, BackoffPolicy};

type FetchResult = Result<Option<UserProfile>, ProfileFetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    access_token: String,
    generation: u64,
    future: SharedFetch,
}

/// Profile loader with single-flight coalescing per credential.
pub struct ProfileLoader<B: DataBackend + 'static> {
    backend: Arc<B>,
    config: SessionConfig,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
}

impl<B: DataBackend + 'static> ProfileLoader<B> {
    pub fn new(backend: Arc<B>, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Fetch the profile for `user_id`, authenticating with `access_token`.
    ///
    /// While a fetch for the same credential is in flight, additional
    /// callers await the same pending result instead of issuing a new
    /// request; the slot is cleared when that operation settles. A missing
    /// profile row is `Ok(None)`, not an error.
    #[instrument(skip(self, access_token), level = "debug")]
    pub async fn fetch(&self, user_id: UserId, access_token: &str) -> FetchResult {
        let (future, generation) = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(current) if current.access_token == access_token => {
                    debug!("joining in-flight profile fetch");
                    (current.future.clone(), current.generation)
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = Self::fetch_fresh(
                        Arc::clone(&self.backend),
                        self.config.clone(),
                        user_id,
                        access_token.to_string(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        access_token: access_token.to_string(),
                        generation,
                        future: future.clone(),
                    });
                    (future, generation)
                }
            }
        };

        let result = future.await;

        // Clear the slot once settled, unless a newer fetch already took it.
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }

        result
    }

    async fn fetch_fresh(
        backend: Arc<B>,
        config: SessionConfig,
        user_id: UserId,
        access_token: String,
    ) -> FetchResult {
        let row = with_retry(BackoffPolicy::profile_fetch(), || {
            let backend = Arc::clone(&backend);
            let access_token = access_token.clone();
            let profile_timeout = config.profile_timeout;
            async move {
                match timeout(
                    profile_timeout,
                    backend.get_row(Table::Profiles, &user_id.to_string(), &access_token),
                )
                .await
                {
                    Ok(result) => result.map_err(ProfileFetchError::from),
                    Err(_) => Err(ProfileFetchError::Timeout),
                }
            }
        })
        .await?;

        let Some(row) = row else {
            debug!(%user_id, "no profile row");
            return Ok(None);
        };

        let mut profile: UserProfile = serde_json::from_value(row)
            .map_err(|e| ProfileFetchError::Malformed(e.to_string()))?;

        if let Some(store_id) = profile.store_id {
            // A failed store fetch is logged and swallowed; the profile is
            // still usable without it.
            match timeout(
                config.store_timeout,
                backend.get_row(Table::Stores, &store_id.to_string(), &access_token),
            )
            .await
            {
                Ok(Ok(Some(value))) => match serde_json::from_value::<Store>(value) {
                    Ok(store) => profile.store = Some(store),
                    Err(e) => warn!(%store_id, error = %e, "malformed store row; continuing without store"),
                },
                Ok(Ok(None)) => warn!(%store_id, "profile references a missing store"),
                Ok(Err(e)) => warn!(%store_id, error = %e, "store fetch failed; continuing without store"),
                Err(_) => warn!(%store_id, "store fetch timed out; continuing without store"),
            }
        }

        if profile.permissions.is_empty() {
            let preset = permissions::role_preset(&profile.role);
            profile.permissions = permissions::normalize_role(&profile.role, &preset);
            debug!(role = %profile.role, "hydrated default permissions");
        }

        Ok(Some(profile))
    }
}

impl<B: DataBackend + 'static> std::fmt::Debug for ProfileLoader<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLoader")
            .field("in_flight", &self.in_flight.lock().is_some())
            .finish_non_exhaustive()
    }
}
