use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{DomainError, DomainResult, Permission, Resource, Role, RolePermissionCollection};

/// Whether grants on a resource live in the `global` domain or in each tenant domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    Global,
    Domain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub name: Resource,
    pub scope: PermissionScope,
    #[serde(default)]
    pub immutable: bool,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    scope: PermissionScope,
    immutable: bool,
    permissions: BTreeSet<Permission>,
}

/// Registry of the legal (Permission, Resource) pairs.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    entries: BTreeMap<Resource, CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    resources: Vec<CatalogResource>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource. Registering the same resource twice merges its permissions;
    /// the later scope and immutability flag win.
    pub fn register(&mut self, resource: CatalogResource) -> &mut Self {
        let entry = self
            .entries
            .entry(resource.name)
            .or_insert_with(|| CatalogEntry {
                scope: resource.scope,
                immutable: resource.immutable,
                permissions: BTreeSet::new(),
            });
        entry.scope = resource.scope;
        entry.immutable = resource.immutable;
        entry.permissions.extend(resource.permissions);
        self
    }

    pub fn from_resources(resources: impl IntoIterator<Item = CatalogResource>) -> Self {
        let mut catalog = Self::new();
        for resource in resources {
            catalog.register(resource);
        }
        catalog
    }

    /// Parses `{"resources": [{"name", "scope", "immutable", "permissions"}]}`.
    pub fn from_json(json: &str) -> DomainResult<Self> {
        let document: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| DomainError::ValidationError(format!("invalid resource catalog: {}", e)))?;
        Ok(Self::from_resources(document.resources))
    }

    pub fn scope(&self, resource: &Resource) -> Option<PermissionScope> {
        self.entries.get(resource).map(|entry| entry.scope)
    }

    pub fn is_immutable(&self, resource: &Resource) -> bool {
        self.entries
            .get(resource)
            .map(|entry| entry.immutable)
            .unwrap_or(false)
    }

    pub fn permits(&self, permission: &Permission, resource: &Resource) -> bool {
        self.entries
            .get(resource)
            .map(|entry| entry.permissions.contains(permission))
            .unwrap_or(false)
    }

    /// Checks that `role` may hold `permission` on `resource` and returns the resource scope.
    pub fn validate_grant(
        &self,
        role: &Role,
        permission: &Permission,
        resource: &Resource,
    ) -> DomainResult<PermissionScope> {
        let scope = self
            .scope(resource)
            .ok_or_else(|| DomainError::UnknownResource(resource.to_string()))?;

        if !self.permits(permission, resource) {
            return Err(DomainError::PermissionNotApplicable {
                permission: permission.to_string(),
                resource: resource.to_string(),
            });
        }

        if permission.is_update() && self.is_immutable(resource) && !role.is_administrator() {
            return Err(DomainError::ImmutableResource {
                role: role.to_string(),
                permission: permission.to_string(),
                resource: resource.to_string(),
            });
        }

        Ok(scope)
    }

    /// Every registered pair, as permission to resources.
    pub fn list(&self) -> RolePermissionCollection {
        let mut collection = RolePermissionCollection::new();
        for (resource, entry) in &self.entries {
            for permission in &entry.permissions {
                collection
                    .entry(permission.clone())
                    .or_default()
                    .push(resource.clone());
            }
        }
        collection
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
