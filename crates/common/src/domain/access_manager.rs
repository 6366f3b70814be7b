use async_trait::async_trait;
use garde::Validate;

use super::{
    Domain, DomainResult, Permission, Resource, Role, RoleCollection, RolePermissionCollection,
    User, UserAccess, UserPermissionCollection, NOOP_USER,
};
use crate::garde::validate_struct;

/// Administrative operations over roles, assignments and grants.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AccessManager: Send + Sync {
    /// Creates a role. `NotFound` if the domain is unknown, `Conflict` if the role exists.
    async fn add_role(&self, domain: &Domain, role: &Role) -> DomainResult<()>;

    async fn role_exists(&self, domain: &Domain, role: &Role) -> DomainResult<bool>;

    /// Deletes a role with its grants. Returns `false` if there was nothing to delete and
    /// fails with `BadRequest` while users are still assigned.
    async fn delete_role(&self, domain: &Domain, role: &Role) -> DomainResult<bool>;

    /// Sorted role names of a domain.
    async fn roles(&self, domain: &Domain) -> DomainResult<Vec<Role>>;

    /// Assigns every role to the user. All roles must exist; nothing is assigned otherwise.
    async fn add_user_roles(&self, domain: &Domain, user: &User, roles: &[Role])
        -> DomainResult<()>;

    async fn add_role_users(&self, domain: &Domain, role: &Role, users: &[User])
        -> DomainResult<()>;

    /// Removes assignments. Missing roles or assignments are ignored.
    async fn delete_user_roles(
        &self,
        domain: &Domain,
        user: &User,
        roles: &[Role],
    ) -> DomainResult<()>;

    async fn delete_role_users(
        &self,
        domain: &Domain,
        role: &Role,
        users: &[User],
    ) -> DomainResult<()>;

    /// Grants each permission on the global resource `*`.
    async fn add_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()>;

    async fn add_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()>;

    async fn delete_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()>;

    async fn delete_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()>;

    async fn delete_all_role_permissions(&self, domain: &Domain, role: &Role)
        -> DomainResult<()>;

    /// Sorted members of a role, never including the placeholder identity.
    async fn role_users(&self, domain: &Domain, role: &Role) -> DomainResult<Vec<User>>;

    async fn role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
    ) -> DomainResult<RolePermissionCollection>;

    /// An empty `domains` means every domain.
    async fn user(&self, user: &User, domains: &[Domain]) -> DomainResult<UserAccess>;

    /// Every real user, sorted by name.
    async fn users(&self, domains: &[Domain]) -> DomainResult<Vec<UserAccess>>;

    async fn user_roles(&self, user: &User, domains: &[Domain]) -> DomainResult<RoleCollection>;

    async fn user_permissions(
        &self,
        user: &User,
        domains: &[Domain],
    ) -> DomainResult<UserPermissionCollection>;

    /// `global` followed by every tenant domain.
    async fn domains(&self) -> DomainResult<Vec<Domain>>;

    async fn domain_exists(&self, domain: &Domain) -> DomainResult<bool>;
}

/// Input for role creation.
#[derive(Debug, Clone, Validate)]
pub struct NewRoleRequest {
    #[garde(length(min = 1))]
    pub domain: String,
    #[garde(length(min = 1), custom(not_reserved_identity))]
    pub role: String,
}

impl NewRoleRequest {
    pub fn new(domain: &Domain, role: &Role) -> Self {
        Self {
            domain: domain.to_string(),
            role: role.to_string(),
        }
    }

    pub fn validate_request(&self) -> DomainResult<()> {
        validate_struct(self)
    }
}

#[allow(clippy::ptr_arg)]
fn not_reserved_identity(value: &String, _context: &()) -> garde::Result {
    if value == NOOP_USER {
        return Err(garde::Error::new("name is reserved"));
    }
    Ok(())
}
