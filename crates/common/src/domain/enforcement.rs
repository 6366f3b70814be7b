use async_trait::async_trait;

use super::{
    Domain, DomainResult, Permission, Resource, ResourceAccess, RoleCollection, User,
    UserPermissionCollection,
};

/// Answers whether a user may act within a domain.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Enforcement: Send + Sync {
    /// Succeeds only if the user holds every permission on the global resource `*` of
    /// `domain`. Fails with `InvalidDomain` for an unknown domain and `Forbidden` naming
    /// the first permission that is missing.
    async fn has_all(
        &self,
        user: &User,
        domain: &Domain,
        permissions: &[Permission],
    ) -> DomainResult<()>;

    /// Checks `permission` on each resource and reports every resource that is not granted.
    async fn has_resources(
        &self,
        user: &User,
        domain: &Domain,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<ResourceAccess>;

    /// Roles held by the user, per domain. An empty `domains` means every domain.
    async fn effective_roles(&self, user: &User, domains: &[Domain])
        -> DomainResult<RoleCollection>;

    /// Permissions reachable through the user's roles, per domain and resource.
    async fn effective_permissions(
        &self,
        user: &User,
        domains: &[Domain],
    ) -> DomainResult<UserPermissionCollection>;
}
