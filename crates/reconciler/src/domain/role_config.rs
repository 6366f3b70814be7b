use std::collections::BTreeSet;

use common::domain::{DomainError, DomainResult, Role, RolePermissionCollection, NOOP_USER};
use common::garde::validate_struct;
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Desired role definitions, applied identically to every domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RoleConfig {
    #[garde(dive)]
    pub roles: Vec<RoleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RoleDefinition {
    #[garde(custom(valid_role_name))]
    pub name: Role,
    /// Permission to the resources it applies to.
    #[garde(skip)]
    #[serde(default)]
    pub permissions: RolePermissionCollection,
}

fn valid_role_name(value: &Role, _context: &()) -> garde::Result {
    let name = value.as_str();
    if name.trim().is_empty() {
        return Err(garde::Error::new("role name must not be empty"));
    }
    if name == NOOP_USER {
        return Err(garde::Error::new("role name is reserved"));
    }
    Ok(())
}

impl RoleConfig {
    /// Parses a JSON document of the form `{"roles": [{"name", "permissions"}]}`.
    pub fn from_json(json: &str) -> DomainResult<Self> {
        let config: RoleConfig = serde_json::from_str(json)
            .map_err(|e| DomainError::ValidationError(format!("invalid role config: {}", e)))?;
        Ok(config)
    }

    /// Field checks plus uniqueness of role names.
    pub fn validate_config(&self) -> DomainResult<()> {
        validate_struct(self)?;

        let mut seen = BTreeSet::new();
        for role in &self.roles {
            if !seen.insert(&role.name) {
                return Err(DomainError::ValidationError(format!(
                    "role {} is defined more than once",
                    role.name
                )));
            }
        }
        Ok(())
    }
}
