//! Role capability resolution
//!
//! Expands role-level capability declarations into normalized sets and
//! answers capability queries. Expansion is union-only: an explicitly
//! granted fine-grained token is never removed, coarse tokens stay
//! alongside their expansions, and re-normalizing an already-normalized
//! catalog is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use till_types::{Role, UserProfile};

/// Fine tokens behind the coarse `settings` grant.
const SETTINGS_FINE: &[&str] = &[
    "settings.profile",
    "settings.store",
    "settings.receipt",
    "settings.taxes",
    "settings.access",
    "settings.fees",
    "settings.subscription",
];

/// Settings fines withheld from non-privileged roles.
const SETTINGS_PRIVILEGED_ONLY: &[&str] =
    &["settings.access", "settings.fees", "settings.subscription"];

/// Fine tokens behind the coarse `products` grant for privileged roles.
const PRODUCTS_FINE_PRIVILEGED: &[&str] = &[
    "products.list",
    "products.create",
    "products.edit",
    "products.delete",
    "products.categories",
    "products.inventory",
];

/// Fine tokens behind the coarse `reports` grant (same for all roles).
const REPORTS_FINE: &[&str] = &[
    "reports.sales_summary",
    "reports.sales_items",
    "reports.profit_loss",
    "reports.shift",
];

/// Default declaration for privileged roles.
const PRIVILEGED_PRESET: &[&str] = &[
    "dashboard",
    "pos",
    "products",
    "transactions",
    "reports",
    "settings",
    "sales",
    "shifts",
    "customers",
];

/// Default declaration for staff/sales/cashier roles.
const FLOOR_PRESET: &[&str] = &["pos", "dashboard", "transactions"];

fn to_set(tokens: &[&str]) -> BTreeSet<String> {
    tokens.iter().map(|t| (*t).to_string()).collect()
}

/// Default capability declaration for a role, used to hydrate profiles
/// loaded without an explicit permission list. Run the result through
/// [`normalize_role`] before storing it on a profile.
pub fn role_preset(role: &Role) -> BTreeSet<String> {
    if role.is_privileged() {
        to_set(PRIVILEGED_PRESET)
    } else if role.is_floor_role() {
        to_set(FLOOR_PRESET)
    } else {
        to_set(&["dashboard"])
    }
}

/// Normalize a declared catalog, or produce the built-in one.
///
/// The built-in catalog gives privileged roles the broad preset (expanded,
/// so the result is already normalized and a second pass is a no-op) and
/// the floor roles their minimal preset.
pub fn normalize(
    declared: Option<&BTreeMap<String, BTreeSet<String>>>,
) -> BTreeMap<String, BTreeSet<String>> {
    match declared {
        Some(catalog) => catalog
            .iter()
            .map(|(role_name, caps)| {
                let role = Role::from(role_name.clone());
                (role_name.clone(), expand_for_role(&role, caps))
            })
            .collect(),
        None => builtin_catalog(),
    }
}

/// Normalize a single role's declaration.
pub fn normalize_role(role: &Role, declared: &BTreeSet<String>) -> BTreeSet<String> {
    expand_for_role(role, declared)
}

fn builtin_catalog() -> BTreeMap<String, BTreeSet<String>> {
    let mut catalog = BTreeMap::new();
    for role in [Role::SuperAdmin, Role::Owner, Role::Admin] {
        catalog.insert(
            role.as_str().to_string(),
            expand_for_role(&role, &to_set(PRIVILEGED_PRESET)),
        );
    }
    for role in [Role::Staff, Role::Sales] {
        catalog.insert(
            role.as_str().to_string(),
            expand_for_role(&role, &to_set(FLOOR_PRESET)),
        );
    }
    catalog
}

/// The ordered, union-only expansion pipeline.
fn expand_for_role(role: &Role, declared: &BTreeSet<String>) -> BTreeSet<String> {
    let mut caps = declared.clone();
    let privileged = role.is_privileged();

    // 1. Coarse settings, with sensitive fines withheld from non-privileged roles
    if caps.contains("settings") {
        for fine in SETTINGS_FINE {
            if !privileged && SETTINGS_PRIVILEGED_ONLY.contains(fine) {
                continue;
            }
            caps.insert((*fine).to_string());
        }
    }

    // 2. Coarse products
    if caps.contains("products") {
        if privileged {
            for fine in PRODUCTS_FINE_PRIVILEGED {
                caps.insert((*fine).to_string());
            }
        } else {
            caps.insert("products.list".to_string());
        }
    }

    // 3. Coarse reports, same fine set for every role
    if caps.contains("reports") {
        for fine in REPORTS_FINE {
            caps.insert((*fine).to_string());
        }
    }

    // 4. Coarse sales
    if caps.contains("sales") {
        caps.insert("sales.target".to_string());
    }

    // 5. Privilege backfill: void/refund only for privileged roles
    if privileged && caps.contains("transactions") {
        caps.insert("transactions.void".to_string());
        caps.insert("transactions.refund".to_string());
    }

    // 6. Floor roles always end up with at least these
    if role.is_floor_role() {
        caps.insert("dashboard".to_string());
        caps.insert("transactions".to_string());
    }

    caps
}

/// Capability query against a profile's normalized permission set.
///
/// Super admins and owners pass unconditionally. Otherwise a literal hit,
/// a held fine token under the queried coarse token, or a held coarse
/// token over the queried fine token all grant access.
pub fn has_capability(profile: &UserProfile, query: &str) -> bool {
    if matches!(profile.role, Role::SuperAdmin | Role::Owner) {
        return true;
    }

    let held = &profile.permissions;
    if held.contains(query) {
        return true;
    }

    // Holding products.list satisfies a query for products
    let fine_prefix = format!("{query}.");
    if held.iter().any(|p| p.starts_with(&fine_prefix)) {
        return true;
    }

    // Holding products satisfies a query for products.list
    if let Some((coarse, _rest)) = query.split_once('.') {
        if held.contains(coarse) {
            return true;
        }
    }

    false
}
