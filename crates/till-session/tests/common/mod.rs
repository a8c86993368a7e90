#![allow(dead_code)]

//! Shared test fixtures: in-memory backend collaborators and payload
//! builders.

pub mod mock_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use till_session::{CredentialStore, LockFlagStore, SessionConfig, SessionCoordinator};
use till_types::{StoreId, StoredCredential, StoredCredentialUser, UserId};

pub use mock_backend::{MockDataBackend, MockIdentityProvider};

/// A two-dot bearer token whose expiry claim is `ttl_secs` from now.
pub fn bearer_token(ttl_secs: i64) -> String {
    let exp = Utc::now().timestamp() + ttl_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("hdr.{payload}.sig")
}

pub fn profile_row(user_id: UserId, role: &str, store_id: Option<StoreId>) -> Value {
    let mut row = json!({
        "id": user_id.to_string(),
        "display_name": "Test User",
        "role": role,
    });
    if let Some(store_id) = store_id {
        row["store_id"] = json!(store_id.to_string());
    }
    row
}

pub fn store_row(store_id: StoreId, auto_lock_enabled: bool, minutes: Option<u32>) -> Value {
    json!({
        "id": store_id.to_string(),
        "name": "Test Store",
        "settings": {
            "auto_lock_enabled": auto_lock_enabled,
            "auto_lock_minutes": minutes,
        }
    })
}

pub fn credential(user_id: UserId, access_token: &str) -> StoredCredential {
    StoredCredential {
        access_token: access_token.to_string(),
        user: StoredCredentialUser {
            id: user_id.to_string(),
        },
    }
}

/// In-memory persisted-credential blob.
#[derive(Default)]
pub struct MemoryCredentialStore {
    blob: Mutex<Option<StoredCredential>>,
}

impl MemoryCredentialStore {
    pub fn set(&self, credential: StoredCredential) {
        *self.blob.lock() = Some(credential);
    }

    pub fn get(&self) -> Option<StoredCredential> {
        self.blob.lock().clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<StoredCredential> {
        self.blob.lock().clone()
    }

    fn clear(&self) {
        *self.blob.lock() = None;
    }
}

/// In-memory durable lock flag.
#[derive(Default)]
pub struct MemoryLockFlag {
    locked: AtomicBool,
}

impl MemoryLockFlag {
    pub fn set(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl LockFlagStore for MemoryLockFlag {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

/// A coordinator wired to in-memory collaborators, with handles kept for
/// inspection.
pub struct Harness {
    pub provider: Arc<MockIdentityProvider>,
    pub backend: Arc<MockDataBackend>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub lock_flag: Arc<MemoryLockFlag>,
    pub coordinator: SessionCoordinator<MockIdentityProvider, MockDataBackend>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness(config: SessionConfig) -> Harness {
    init_tracing();
    let provider = Arc::new(MockIdentityProvider::default());
    let backend = Arc::new(MockDataBackend::default());
    let credentials = Arc::new(MemoryCredentialStore::default());
    let lock_flag = Arc::new(MemoryLockFlag::default());
    let coordinator = SessionCoordinator::new(
        Arc::clone(&provider),
        Arc::clone(&backend),
        Arc::clone(&credentials) as Arc<dyn CredentialStore>,
        Arc::clone(&lock_flag) as Arc<dyn LockFlagStore>,
        config,
    );
    Harness {
        provider,
        backend,
        credentials,
        lock_flag,
        coordinator,
    }
}
