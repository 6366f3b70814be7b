use serde::{Deserialize, Serialize};

use super::{Resource, RoleCollection, User, UserPermissionCollection};

/// Composite view of a user across a set of domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess {
    pub name: User,
    pub roles: RoleCollection,
    pub permissions: UserPermissionCollection,
}

/// Outcome of a per-resource check. `missing` keeps the order of the request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceAccess {
    pub granted: bool,
    pub missing: Vec<Resource>,
}

impl ResourceAccess {
    pub fn from_missing(missing: Vec<Resource>) -> Self {
        Self {
            granted: missing.is_empty(),
            missing,
        }
    }
}
