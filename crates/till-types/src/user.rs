//! User identity types

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Store, StoreId};

/// Unique user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a user ID from a string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Role assigned to a user profile.
///
/// The fixed roles match the backend's `role` column values; anything
/// outside that set is carried through as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    SuperAdmin,
    Owner,
    Admin,
    Staff,
    Sales,
    Custom(String),
}

impl Role {
    /// Privileged roles bypass most permission checks and receive the
    /// broad capability expansions.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Owner | Self::Admin)
    }

    /// Floor roles (staff, sales, and cashier-named custom roles) always
    /// carry at least the dashboard and transactions capabilities.
    pub fn is_floor_role(&self) -> bool {
        match self {
            Self::Staff | Self::Sales => true,
            Self::Custom(name) => name.to_ascii_lowercase().contains("cashier"),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Sales => "sales",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "super_admin" => Self::SuperAdmin,
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "staff" => Self::Staff,
            "sales" => Self::Sales,
            _ => Self::Custom(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::str::FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence status maintained on the profile row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
}

/// Application-level user identity record.
///
/// Owned by the session: mutated by the profile loader on load and shallow
/// merged by realtime push updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
    /// Normalized capability set; empty means "not yet hydrated".
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub store_id: Option<StoreId>,
    /// Attached after a successful store fetch; never part of the row payload.
    #[serde(skip)]
    pub store: Option<Store>,
    #[serde(default)]
    pub presence: PresenceStatus,
    #[serde(default)]
    pub last_force_logout_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Shallow-merge a push payload into this profile.
    ///
    /// Only fields present in the patch overwrite; absent fields are left
    /// untouched. The attached store is never replaced here (store rows
    /// arrive on their own channel).
    pub fn apply_patch(&mut self, patch: &ProfilePatch) {
        if let Some(name) = &patch.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(role) = &patch.role {
            self.role = role.clone();
        }
        if let Some(permissions) = &patch.permissions {
            self.permissions = permissions.clone();
        }
        if let Some(store_id) = patch.store_id {
            self.store_id = Some(store_id);
        }
        if let Some(presence) = patch.presence {
            self.presence = presence;
        }
        if let Some(ts) = patch.last_force_logout_at {
            self.last_force_logout_at = Some(ts);
        }
    }
}

/// Partial profile payload carried by push updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub permissions: Option<BTreeSet<String>>,
    #[serde(default)]
    pub store_id: Option<StoreId>,
    #[serde(default)]
    pub presence: Option<PresenceStatus>,
    #[serde(default)]
    pub last_force_logout_at: Option<DateTime<Utc>>,
}
