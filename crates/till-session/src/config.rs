//! Coordinator configuration

use std::time::Duration;

/// Timing knobs for the session coordinator.
///
/// The defaults are the production values; tests shrink them where a
/// property needs a short horizon.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time bound for the profile row query.
    pub profile_timeout: Duration,
    /// Time bound for the store row query.
    pub store_timeout: Duration,
    /// Watchdog that forcibly releases `loading` if no bootstrap attempt
    /// has completed. Fail-open by design: a slow network may briefly
    /// present as signed out rather than spin forever.
    pub bootstrap_watchdog: Duration,
    /// Idle duration before locking when the store does not configure one.
    pub default_lock_duration: Duration,
    /// Minimum interval between idle-timer resets from activity signals.
    pub activity_throttle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile_timeout: Duration::from_secs(15),
            store_timeout: Duration::from_secs(10),
            bootstrap_watchdog: Duration::from_secs(20),
            default_lock_duration: Duration::from_secs(30 * 60),
            activity_throttle: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_profile_timeout(mut self, timeout: Duration) -> Self {
        self.profile_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_bootstrap_watchdog(mut self, timeout: Duration) -> Self {
        self.bootstrap_watchdog = timeout;
        self
    }

    #[must_use]
    pub fn with_default_lock_duration(mut self, duration: Duration) -> Self {
        self.default_lock_duration = duration;
        self
    }

    #[must_use]
    pub fn with_activity_throttle(mut self, throttle: Duration) -> Self {
        self.activity_throttle = throttle;
        self
    }
}
