//! Store (tenant) types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique store identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(pub Uuid);

impl StoreId {
    /// Create a new random store ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a store ID from a string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StoreId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Store row: id plus the settings blob.
///
/// Read-mostly; push updates replace the settings wholesale, there is no
/// field-level merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: StoreSettings,
}

/// Store settings blob: idle-lock configuration and feature flags.
///
/// Unknown fields in the backend payload are ignored so settings-schema
/// additions never break older clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub auto_lock_enabled: bool,
    /// Idle minutes before the screen locks; `None` means "use the default".
    #[serde(default)]
    pub auto_lock_minutes: Option<u32>,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
}
