/*!
 * # Permissions Module
 *
 * The permission catalogue. Keys are `resource:action`; grants may also use
 * `resource:*`, `*:action` or the super wildcard `*`.
 */

/// Permission string constants for compile-time safety
pub mod consts {
    pub const TENANT_MANAGE: &str = "tenant:manage";
    pub const USERS_MANAGE: &str = "users:manage";
    pub const ROLES_MANAGE: &str = "roles:manage";
    pub const BRANCHES_MANAGE: &str = "branches:manage";

    pub const PRODUCTS_READ: &str = "products:read";
    pub const PRODUCTS_WRITE: &str = "products:write";

    pub const STOCK_READ: &str = "stock:read";
    pub const STOCK_WRITE: &str = "stock:write";

    pub const TRANSFERS_READ: &str = "transfers:read";
    pub const TRANSFERS_WRITE: &str = "transfers:write";
    pub const TRANSFERS_APPROVE: &str = "transfers:approve";
    pub const TRANSFERS_REVERSE: &str = "transfers:reverse";

    pub const APPROVALS_MANAGE: &str = "approvals:manage";
    pub const AUDIT_READ: &str = "audit:read";
}

use consts::*;

/// Every concrete permission the service checks.
pub const CATALOGUE: [&str; 14] = [
    TENANT_MANAGE,
    USERS_MANAGE,
    ROLES_MANAGE,
    BRANCHES_MANAGE,
    PRODUCTS_READ,
    PRODUCTS_WRITE,
    STOCK_READ,
    STOCK_WRITE,
    TRANSFERS_READ,
    TRANSFERS_WRITE,
    TRANSFERS_APPROVE,
    TRANSFERS_REVERSE,
    APPROVALS_MANAGE,
    AUDIT_READ,
];

pub const SUPER_WILDCARD: &str = "*";

/// Returns true when `granted` covers `required`.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == SUPER_WILDCARD || granted == required {
        return true;
    }

    let (Some((g_res, g_act)), Some((r_res, r_act))) =
        (granted.split_once(':'), required.split_once(':'))
    else {
        return false;
    };

    (g_res == "*" || g_res == r_res) && (g_act == "*" || g_act == r_act)
}

/// A grant is valid when it is a catalogue key or a wildcard that covers at
/// least one catalogue key.
pub fn is_valid_grant(key: &str) -> bool {
    if key == SUPER_WILDCARD || CATALOGUE.contains(&key) {
        return true;
    }
    key.contains('*')
        && key.split_once(':').is_some()
        && CATALOGUE.iter().any(|perm| permission_matches(key, perm))
}
