//! Scriptable in-memory identity provider and data backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use till_session::{
    BackendError, ChangeCallback, DataBackend, IdentityProvider, RowChange, SubscriptionHandle,
    Table,
};
use till_types::AuthSession;

/// Identity provider whose `get_session` results are scripted.
///
/// An empty script answers `Ok(None)`. Set `hang_get_session` to park the
/// call forever (for watchdog tests).
#[derive(Default)]
pub struct MockIdentityProvider {
    session_script: Mutex<VecDeque<Result<Option<AuthSession>, BackendError>>>,
    sign_in_result: Mutex<Option<Result<AuthSession, BackendError>>>,
    hang_get_session: AtomicBool,
    pub get_session_calls: AtomicU32,
    pub sign_in_calls: AtomicU32,
    pub sign_out_calls: AtomicU32,
}

impl MockIdentityProvider {
    pub fn script_session(&self, result: Result<Option<AuthSession>, BackendError>) {
        self.session_script.lock().push_back(result);
    }

    pub fn set_sign_in_result(&self, result: Result<AuthSession, BackendError>) {
        *self.sign_in_result.lock() = Some(result);
    }

    pub fn hang_get_session(&self) {
        self.hang_get_session.store(true, Ordering::SeqCst);
    }

    pub fn sign_out_count(&self) -> u32 {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn get_session_count(&self) -> u32 {
        self.get_session_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_get_session.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.session_script
            .lock()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<AuthSession, BackendError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        self.sign_in_result
            .lock()
            .clone()
            .unwrap_or_else(|| Err(BackendError::Unauthenticated("no sign-in scripted".into())))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Row store with scripted failures, per-table call counts, and a push
/// registry that lets tests deliver row-change events.
#[derive(Default)]
pub struct MockDataBackend {
    rows: DashMap<(Table, String), Value>,
    failures: Mutex<Vec<(Table, BackendError)>>,
    get_row_delay: Mutex<Option<Duration>>,
    get_row_calls: DashMap<Table, u32>,
    patches: Mutex<Vec<(Table, String, Value)>>,
    callbacks: Arc<Mutex<Vec<Registration>>>,
    next_subscription_id: AtomicU32,
    active_subscriptions: Arc<DashMap<String, i32>>,
}

struct Registration {
    id: u32,
    channel: String,
    table: Table,
    row_id: String,
    on_change: ChangeCallback,
}

impl MockDataBackend {
    pub fn insert_row(&self, table: Table, id: &str, row: Value) {
        self.rows.insert((table, id.to_string()), row);
    }

    pub fn remove_row(&self, table: Table, id: &str) {
        self.rows.remove(&(table, id.to_string()));
    }

    /// Queue a failure for the next `get_row` on `table`.
    pub fn script_failure(&self, table: Table, error: BackendError) {
        self.failures.lock().push((table, error));
    }

    /// Delay every `get_row` answer, so tests can overlap concurrent calls.
    pub fn set_get_row_delay(&self, delay: Duration) {
        *self.get_row_delay.lock() = Some(delay);
    }

    pub fn get_row_count(&self, table: Table) -> u32 {
        self.get_row_calls.get(&table).map(|c| *c).unwrap_or(0)
    }

    /// Patches recorded by `update_row`, oldest first.
    pub fn patches(&self, table: Table) -> Vec<(String, Value)> {
        self.patches
            .lock()
            .iter()
            .filter(|(t, _, _)| *t == table)
            .map(|(_, id, patch)| (id.clone(), patch.clone()))
            .collect()
    }

    /// Deliver a row-change event to every live callback on `channel`.
    pub fn push(&self, channel: &str, payload: Value) {
        let callbacks = self.callbacks.lock();
        for registration in callbacks.iter() {
            if registration.channel == channel {
                (registration.on_change)(RowChange {
                    table: registration.table,
                    id: registration.row_id.clone(),
                    payload: payload.clone(),
                });
            }
        }
    }

    /// Live (unreleased) subscription count for a channel.
    pub fn active_subscriptions(&self, channel: &str) -> i32 {
        self.active_subscriptions
            .get(channel)
            .map(|c| *c)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DataBackend for MockDataBackend {
    async fn get_row(
        &self,
        table: Table,
        id: &str,
        _access_token: &str,
    ) -> Result<Option<Value>, BackendError> {
        *self.get_row_calls.entry(table).or_insert(0) += 1;

        let delay = *self.get_row_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = {
            let mut failures = self.failures.lock();
            failures
                .iter()
                .position(|(t, _)| *t == table)
                .map(|i| failures.remove(i).1)
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(self
            .rows
            .get(&(table, id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn update_row(
        &self,
        table: Table,
        id: &str,
        patch: Value,
        _access_token: &str,
    ) -> Result<(), BackendError> {
        self.patches.lock().push((table, id.to_string(), patch));
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        table: Table,
        id: &str,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, BackendError> {
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().push(Registration {
            id: subscription_id,
            channel: channel.to_string(),
            table,
            row_id: id.to_string(),
            on_change,
        });
        *self
            .active_subscriptions
            .entry(channel.to_string())
            .or_insert(0) += 1;

        let callbacks = Arc::clone(&self.callbacks);
        let active = Arc::clone(&self.active_subscriptions);
        let channel_name = channel.to_string();
        Ok(SubscriptionHandle::new(channel, move || {
            callbacks.lock().retain(|r| r.id != subscription_id);
            if let Some(mut count) = active.get_mut(&channel_name) {
                *count -= 1;
            }
        }))
    }
}
