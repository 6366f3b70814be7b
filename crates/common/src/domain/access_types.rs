use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

pub const GLOBAL_DOMAIN: &str = "global";
pub const GLOBAL_RESOURCE: &str = "*";
pub const NOOP_USER: &str = "noop";
pub const ADMINISTRATOR_ROLE: &str = "Administrator";
pub const UPDATE_PERMISSION: &str = "Update";

name_type!(
    /// Tenant scope. `global` always exists and is not backed by a tenant.
    Domain
);
name_type!(Role);
name_type!(User);
name_type!(Permission);
name_type!(
    /// Protected object. `*` stands for "the domain as a whole".
    Resource
);

impl Domain {
    pub fn global() -> Self {
        Self::new(GLOBAL_DOMAIN)
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_DOMAIN
    }
}

impl Resource {
    pub fn global() -> Self {
        Self::new(GLOBAL_RESOURCE)
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_RESOURCE
    }
}

impl User {
    /// Reserved identity used only to witness that a role exists.
    pub fn noop() -> Self {
        Self::new(NOOP_USER)
    }

    pub fn is_noop(&self) -> bool {
        self.0 == NOOP_USER
    }
}

impl Role {
    pub fn administrator() -> Self {
        Self::new(ADMINISTRATOR_ROLE)
    }

    pub fn is_administrator(&self) -> bool {
        self.0 == ADMINISTRATOR_ROLE
    }
}

impl Permission {
    pub fn update() -> Self {
        Self::new(UPDATE_PERMISSION)
    }

    pub fn is_update(&self) -> bool {
        self.0 == UPDATE_PERMISSION
    }
}

/// Roles held per domain.
pub type RoleCollection = BTreeMap<Domain, Vec<Role>>;

/// Resource to permissions, per domain.
pub type UserPermissionCollection = BTreeMap<Domain, BTreeMap<Resource, Vec<Permission>>>;

/// Permission to the resources it is granted on.
pub type RolePermissionCollection = BTreeMap<Permission, Vec<Resource>>;

/// Sorts and deduplicates every list in a permission-to-resources map, dropping empty keys.
pub fn normalize_role_permissions(mut collection: RolePermissionCollection) -> RolePermissionCollection {
    collection.retain(|_, resources| {
        resources.sort();
        resources.dedup();
        !resources.is_empty()
    });
    collection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_values() {
        assert!(Domain::global().is_global());
        assert!(Resource::global().is_global());
        assert!(User::noop().is_noop());
        assert!(Role::administrator().is_administrator());
        assert!(!Domain::from("t1").is_global());
    }

    #[test]
    fn test_names_serialize_transparently() {
        let role = Role::new("Viewer");
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"Viewer\"");

        let parsed: Permission = serde_json::from_str("\"ViewUsers\"").unwrap();
        assert_eq!(parsed, Permission::from("ViewUsers"));
    }

    #[test]
    fn test_normalize_role_permissions() {
        let mut collection = RolePermissionCollection::new();
        collection.insert(
            Permission::from("View"),
            vec![Resource::from("b"), Resource::from("a"), Resource::from("b")],
        );
        collection.insert(Permission::from("Edit"), vec![]);

        let normalized = normalize_role_permissions(collection);
        assert_eq!(normalized.len(), 1);
        assert_eq!(
            normalized[&Permission::from("View")],
            vec![Resource::from("a"), Resource::from("b")]
        );
    }
}
