use async_trait::async_trait;

use super::{Domain, DomainResult, Permission, Resource, Role, User};

pub type RecordId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: RecordId,
    pub name: User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub id: RecordId,
    pub domain: Domain,
    pub name: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    pub id: RecordId,
    pub name: Permission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: RecordId,
    pub name: Resource,
}

/// A (permission, resource) pair granted to a role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GrantRecord {
    pub permission: Permission,
    pub resource: Resource,
}

/// The grant that satisfied a permission check, with its attached condition if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantMatch {
    pub role_map_id: RecordId,
    pub condition: Option<String>,
}

/// Relational policy storage with explicit transactions.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Opens a read-write transaction. Dropping it without `commit` discards every write.
    async fn begin(&self) -> DomainResult<Box<dyn PolicyTransaction>>;

    /// Finds a grant joining user, role assignment in `domain`, and (permission, resource).
    /// Unconditional grants are preferred over conditional ones.
    async fn check_permission(
        &self,
        user: &User,
        domain: &Domain,
        resource: &Resource,
        permission: &Permission,
    ) -> DomainResult<Option<GrantMatch>>;
}

#[async_trait]
pub trait PolicyTransaction: Send {
    async fn user_by_name(&mut self, name: &User) -> DomainResult<Option<UserRecord>>;
    async fn create_user(&mut self, name: &User) -> DomainResult<RecordId>;
    async fn delete_user(&mut self, id: RecordId) -> DomainResult<()>;
    async fn list_users(&mut self) -> DomainResult<Vec<UserRecord>>;
    /// Whether the user holds a role in any domain.
    async fn user_has_assignments(&mut self, user_id: RecordId) -> DomainResult<bool>;

    async fn role_by_name(&mut self, domain: &Domain, name: &Role)
        -> DomainResult<Option<RoleRecord>>;
    async fn create_role(&mut self, domain: &Domain, name: &Role) -> DomainResult<RecordId>;
    /// Removes the role together with its assignments, grants and their conditions.
    async fn delete_role(&mut self, id: RecordId) -> DomainResult<()>;
    async fn list_roles(&mut self, domain: &Domain) -> DomainResult<Vec<RoleRecord>>;
    /// Whether a role with this name exists in any domain.
    async fn role_name_in_use(&mut self, name: &Role) -> DomainResult<bool>;

    async fn permission_by_name(&mut self, name: &Permission)
        -> DomainResult<Option<PermissionRecord>>;
    async fn create_permission(&mut self, name: &Permission) -> DomainResult<RecordId>;
    async fn delete_permission(&mut self, id: RecordId) -> DomainResult<()>;

    async fn resource_by_name(&mut self, name: &Resource) -> DomainResult<Option<ResourceRecord>>;
    async fn create_resource(&mut self, name: &Resource) -> DomainResult<RecordId>;
    async fn delete_resource(&mut self, id: RecordId) -> DomainResult<()>;

    /// Idempotent.
    async fn create_user_role_map(
        &mut self,
        user_id: RecordId,
        role_id: RecordId,
        domain: &Domain,
    ) -> DomainResult<()>;
    async fn delete_user_role_map(
        &mut self,
        user_id: RecordId,
        role_id: RecordId,
        domain: &Domain,
    ) -> DomainResult<()>;
    async fn list_role_users(&mut self, role_id: RecordId) -> DomainResult<Vec<UserRecord>>;
    async fn list_user_roles(&mut self, user_id: RecordId, domain: &Domain)
        -> DomainResult<Vec<RoleRecord>>;

    /// Returns the existing id when the pair is already mapped.
    async fn create_permission_resource_map(
        &mut self,
        permission_id: RecordId,
        resource_id: RecordId,
    ) -> DomainResult<RecordId>;
    async fn permission_resource_map_id(
        &mut self,
        permission_id: RecordId,
        resource_id: RecordId,
    ) -> DomainResult<Option<RecordId>>;

    /// Returns the existing id when the role already holds the pair.
    async fn create_role_map(
        &mut self,
        role_id: RecordId,
        permission_resource_id: RecordId,
    ) -> DomainResult<RecordId>;
    async fn delete_role_map(
        &mut self,
        role_id: RecordId,
        permission_resource_id: RecordId,
    ) -> DomainResult<()>;
    async fn list_role_grants(&mut self, role_id: RecordId) -> DomainResult<Vec<GrantRecord>>;

    /// Attaches a condition to a role grant, replacing any previous one.
    async fn create_condition(&mut self, role_map_id: RecordId, condition: &str)
        -> DomainResult<()>;

    async fn commit(self: Box<Self>) -> DomainResult<()>;
}
