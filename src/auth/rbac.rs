/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * System roles are seeded into every tenant on registration. Their permission
 * sets live here; custom roles are stored per tenant and validated against
 * the catalogue in [`super::permissions`].
 */

use super::permissions::{consts::*, permission_matches, CATALOGUE};
use lazy_static::lazy_static;
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Roles every tenant starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemRole {
    Owner,
    Admin,
    Editor,
    Viewer,
}

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct SystemRoleDef {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

lazy_static! {
    pub static ref SYSTEM_ROLES: HashMap<SystemRole, SystemRoleDef> = {
        let mut roles = HashMap::new();

        roles.insert(
            SystemRole::Owner,
            SystemRoleDef {
                name: "Owner",
                description: "Tenant owner with full access",
                permissions: vec!["*"],
            },
        );

        roles.insert(
            SystemRole::Admin,
            SystemRoleDef {
                name: "Admin",
                description: "Administrator without tenant-level settings",
                permissions: CATALOGUE
                    .iter()
                    .copied()
                    .filter(|perm| *perm != TENANT_MANAGE)
                    .collect(),
            },
        );

        roles.insert(
            SystemRole::Editor,
            SystemRoleDef {
                name: "Editor",
                description: "Maintains the catalog, stock and transfer requests",
                permissions: vec![
                    "products:*",
                    "stock:*",
                    TRANSFERS_READ,
                    TRANSFERS_WRITE,
                    AUDIT_READ,
                ],
            },
        );

        roles.insert(
            SystemRole::Viewer,
            SystemRoleDef {
                name: "Viewer",
                description: "Read-only access",
                permissions: vec!["*:read"],
            },
        );

        roles
    };
}

impl SystemRole {
    pub fn key(&self) -> &str {
        self.as_ref()
    }

    pub fn definition(&self) -> &'static SystemRoleDef {
        &SYSTEM_ROLES[self]
    }

    pub fn from_key(key: &str) -> Option<Self> {
        key.parse().ok()
    }

    pub fn all() -> impl Iterator<Item = SystemRole> {
        SystemRole::iter()
    }
}

/// Checks a set of granted permissions against a required one.
pub fn has_permission<S: AsRef<str>>(granted: &[S], required: &str) -> bool {
    granted
        .iter()
        .any(|perm| permission_matches(perm.as_ref(), required))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SystemRole::Owner, TENANT_MANAGE, true)]
    #[case(SystemRole::Admin, TENANT_MANAGE, false)]
    #[case(SystemRole::Admin, USERS_MANAGE, true)]
    #[case(SystemRole::Admin, TRANSFERS_REVERSE, true)]
    #[case(SystemRole::Editor, PRODUCTS_WRITE, true)]
    #[case(SystemRole::Editor, STOCK_WRITE, true)]
    #[case(SystemRole::Editor, TRANSFERS_WRITE, true)]
    #[case(SystemRole::Editor, TRANSFERS_APPROVE, false)]
    #[case(SystemRole::Editor, BRANCHES_MANAGE, false)]
    #[case(SystemRole::Viewer, STOCK_READ, true)]
    #[case(SystemRole::Viewer, AUDIT_READ, true)]
    #[case(SystemRole::Viewer, PRODUCTS_WRITE, false)]
    fn system_role_matrix(
        #[case] role: SystemRole,
        #[case] required: &str,
        #[case] allowed: bool,
    ) {
        assert_eq!(
            has_permission(&role.definition().permissions, required),
            allowed
        );
    }

    #[test]
    fn keys_round_trip_through_strum() {
        assert_eq!(SystemRole::Owner.key(), "OWNER");
        assert_eq!(SystemRole::from_key("VIEWER"), Some(SystemRole::Viewer));
        assert_eq!(SystemRole::from_key("viewer"), None);
        assert_eq!(SystemRole::all().count(), 4);
    }
}
