use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::domain::{
    all_domains, domain_is_known, normalize_role_permissions, resolve_domains, AccessManager,
    Domain, DomainError, DomainResult, Enforcement, NewRoleRequest, Permission, PolicyStore,
    PolicyTransaction, RecordId, Resource, Role, RoleCollection, RolePermissionCollection,
    RoleRecord, TenantDirectory, User, UserAccess, UserPermissionCollection,
};
use crate::store::{ConditionPolicy, StoreEnforcer};

/// Access management over a relational policy store.
///
/// Roles are first-class records keyed by (domain, name). Every operation runs in a
/// single transaction, so a failed call leaves no partial writes behind. Users are
/// created on their first assignment. A name is a user or a role, never both, and only
/// users holding at least one assignment are listed.
pub struct StoreAccessManager {
    store: Arc<dyn PolicyStore>,
    directory: Arc<dyn TenantDirectory>,
    enforcer: StoreEnforcer,
}

impl StoreAccessManager {
    pub fn new(store: Arc<dyn PolicyStore>, directory: Arc<dyn TenantDirectory>) -> Self {
        let enforcer = StoreEnforcer::new(Arc::clone(&store), Arc::clone(&directory));
        Self {
            store,
            directory,
            enforcer,
        }
    }

    pub fn with_condition_policy(mut self, conditions: ConditionPolicy) -> Self {
        self.enforcer = self.enforcer.with_condition_policy(conditions);
        self
    }

    /// Enforcement over the same store.
    pub fn enforcer(&self) -> &StoreEnforcer {
        &self.enforcer
    }

    /// Grants `permission` on `resource` and attaches `condition` to that grant.
    #[instrument(skip(self, condition), fields(domain = %domain, role = %role, permission = %permission, resource = %resource))]
    pub async fn add_conditional_grant(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resource: &Resource,
        condition: &str,
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        let pair_id = ensure_pair(tx.as_mut(), permission, resource).await?;
        let role_map_id = tx.create_role_map(role.id, pair_id).await?;
        tx.create_condition(role_map_id, condition).await?;
        tx.commit().await?;

        debug!(role_map_id, "conditional grant added");
        Ok(())
    }

    async fn require_domain(&self, domain: &Domain) -> DomainResult<()> {
        if !domain_is_known(self.directory.as_ref(), domain).await? {
            return Err(DomainError::DomainNotFound(domain.to_string()));
        }
        Ok(())
    }

    async fn grant(
        &self,
        domain: &Domain,
        role: &Role,
        pairs: &[(&Permission, &Resource)],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        for (permission, resource) in pairs {
            let pair_id = ensure_pair(tx.as_mut(), permission, resource).await?;
            tx.create_role_map(role.id, pair_id).await?;
        }
        tx.commit().await
    }

    async fn revoke(
        &self,
        domain: &Domain,
        role: &Role,
        pairs: &[(&Permission, &Resource)],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        for (permission, resource) in pairs {
            if let Some(pair_id) = find_pair(tx.as_mut(), permission, resource).await? {
                tx.delete_role_map(role.id, pair_id).await?;
            }
        }
        tx.commit().await
    }
}

async fn require_role(
    tx: &mut dyn PolicyTransaction,
    domain: &Domain,
    role: &Role,
) -> DomainResult<RoleRecord> {
    tx.role_by_name(domain, role)
        .await?
        .ok_or_else(|| DomainError::RoleNotFound(role.to_string()))
}

async fn ensure_user(tx: &mut dyn PolicyTransaction, user: &User) -> DomainResult<RecordId> {
    match tx.user_by_name(user).await? {
        Some(record) => Ok(record.id),
        None => tx.create_user(user).await,
    }
}

async fn ensure_pair(
    tx: &mut dyn PolicyTransaction,
    permission: &Permission,
    resource: &Resource,
) -> DomainResult<RecordId> {
    let permission_id = match tx.permission_by_name(permission).await? {
        Some(record) => record.id,
        None => tx.create_permission(permission).await?,
    };
    let resource_id = match tx.resource_by_name(resource).await? {
        Some(record) => record.id,
        None => tx.create_resource(resource).await?,
    };
    tx.create_permission_resource_map(permission_id, resource_id)
        .await
}

async fn find_pair(
    tx: &mut dyn PolicyTransaction,
    permission: &Permission,
    resource: &Resource,
) -> DomainResult<Option<RecordId>> {
    let Some(permission) = tx.permission_by_name(permission).await? else {
        return Ok(None);
    };
    let Some(resource) = tx.resource_by_name(resource).await? else {
        return Ok(None);
    };
    tx.permission_resource_map_id(permission.id, resource.id)
        .await
}

async fn require_assignable(tx: &mut dyn PolicyTransaction, user: &User) -> DomainResult<()> {
    if user.is_noop() {
        return Err(DomainError::ValidationError(format!(
            "user name {} is reserved",
            user
        )));
    }
    if tx.role_name_in_use(&Role::from(user.as_str())).await? {
        return Err(DomainError::ValidationError(format!(
            "{} is a role name",
            user
        )));
    }
    Ok(())
}

/// Whether `name` belongs to a user holding any assignment.
async fn is_user_name(tx: &mut dyn PolicyTransaction, name: &str) -> DomainResult<bool> {
    match tx.user_by_name(&User::from(name)).await? {
        Some(record) => tx.user_has_assignments(record.id).await,
        None => Ok(false),
    }
}

#[async_trait]
impl AccessManager for StoreAccessManager {
    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn add_role(&self, domain: &Domain, role: &Role) -> DomainResult<()> {
        NewRoleRequest::new(domain, role).validate_request()?;
        self.require_domain(domain).await?;

        let mut tx = self.store.begin().await?;
        if tx.role_by_name(domain, role).await?.is_some() {
            return Err(DomainError::RoleAlreadyExists(role.to_string()));
        }
        if is_user_name(tx.as_mut(), role.as_str()).await? {
            return Err(DomainError::ValidationError(format!(
                "role name {} is already used by a user",
                role
            )));
        }
        tx.create_role(domain, role).await?;
        tx.commit().await?;

        debug!("role created");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_exists(&self, domain: &Domain, role: &Role) -> DomainResult<bool> {
        let mut tx = self.store.begin().await?;
        Ok(tx.role_by_name(domain, role).await?.is_some())
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn delete_role(&self, domain: &Domain, role: &Role) -> DomainResult<bool> {
        let mut tx = self.store.begin().await?;
        let Some(record) = tx.role_by_name(domain, role).await? else {
            return Ok(false);
        };
        if !tx.list_role_users(record.id).await?.is_empty() {
            return Err(DomainError::RoleHasUsers(role.to_string()));
        }
        tx.delete_role(record.id).await?;
        tx.commit().await?;

        debug!("role deleted");
        Ok(true)
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn roles(&self, domain: &Domain) -> DomainResult<Vec<Role>> {
        self.require_domain(domain).await?;

        let mut tx = self.store.begin().await?;
        let mut roles: Vec<Role> = tx
            .list_roles(domain)
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();
        roles.sort();
        Ok(roles)
    }

    #[instrument(skip(self, roles), fields(domain = %domain, user = %user))]
    async fn add_user_roles(
        &self,
        domain: &Domain,
        user: &User,
        roles: &[Role],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        require_assignable(tx.as_mut(), user).await?;
        let mut role_ids = Vec::with_capacity(roles.len());
        for role in roles {
            role_ids.push(require_role(tx.as_mut(), domain, role).await?.id);
        }
        let user_id = ensure_user(tx.as_mut(), user).await?;
        for role_id in role_ids {
            tx.create_user_role_map(user_id, role_id, domain).await?;
        }
        tx.commit().await?;

        debug!(count = roles.len(), "roles assigned");
        Ok(())
    }

    #[instrument(skip(self, users), fields(domain = %domain, role = %role))]
    async fn add_role_users(
        &self,
        domain: &Domain,
        role: &Role,
        users: &[User],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        for user in users {
            require_assignable(tx.as_mut(), user).await?;
        }
        let role = require_role(tx.as_mut(), domain, role).await?;
        for user in users {
            let user_id = ensure_user(tx.as_mut(), user).await?;
            tx.create_user_role_map(user_id, role.id, domain).await?;
        }
        tx.commit().await?;

        debug!(count = users.len(), "users assigned");
        Ok(())
    }

    #[instrument(skip(self, roles), fields(domain = %domain, user = %user))]
    async fn delete_user_roles(
        &self,
        domain: &Domain,
        user: &User,
        roles: &[Role],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let Some(user) = tx.user_by_name(user).await? else {
            return Ok(());
        };
        for role in roles {
            if let Some(role) = tx.role_by_name(domain, role).await? {
                tx.delete_user_role_map(user.id, role.id, domain).await?;
            }
        }
        tx.commit().await
    }

    #[instrument(skip(self, users), fields(domain = %domain, role = %role))]
    async fn delete_role_users(
        &self,
        domain: &Domain,
        role: &Role,
        users: &[User],
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        for user in users {
            if let Some(user) = tx.user_by_name(user).await? {
                tx.delete_user_role_map(user.id, role.id, domain).await?;
            }
        }
        tx.commit().await
    }

    async fn add_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        let resource = Resource::global();
        let pairs: Vec<_> = permissions.iter().map(|p| (p, &resource)).collect();
        self.grant(domain, role, &pairs).await
    }

    async fn add_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()> {
        let pairs: Vec<_> = resources.iter().map(|r| (permission, r)).collect();
        self.grant(domain, role, &pairs).await
    }

    async fn delete_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        let resource = Resource::global();
        let pairs: Vec<_> = permissions.iter().map(|p| (p, &resource)).collect();
        self.revoke(domain, role, &pairs).await
    }

    async fn delete_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()> {
        let pairs: Vec<_> = resources.iter().map(|r| (permission, r)).collect();
        self.revoke(domain, role, &pairs).await
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn delete_all_role_permissions(&self, domain: &Domain, role: &Role) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        for grant in tx.list_role_grants(role.id).await? {
            let pair_id = find_pair(tx.as_mut(), &grant.permission, &grant.resource).await?;
            if let Some(pair_id) = pair_id {
                tx.delete_role_map(role.id, pair_id).await?;
            }
        }
        tx.commit().await
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_users(&self, domain: &Domain, role: &Role) -> DomainResult<Vec<User>> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;
        let mut users: Vec<User> = tx
            .list_role_users(role.id)
            .await?
            .into_iter()
            .map(|record| record.name)
            .collect();
        users.sort();
        Ok(users)
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
    ) -> DomainResult<RolePermissionCollection> {
        let mut tx = self.store.begin().await?;
        let role = require_role(tx.as_mut(), domain, role).await?;

        let mut collection = RolePermissionCollection::new();
        for grant in tx.list_role_grants(role.id).await? {
            collection
                .entry(grant.permission)
                .or_default()
                .push(grant.resource);
        }
        Ok(normalize_role_permissions(collection))
    }

    #[instrument(skip(self, domains), fields(user = %user))]
    async fn user(&self, user: &User, domains: &[Domain]) -> DomainResult<UserAccess> {
        let domains = resolve_domains(self.directory.as_ref(), domains).await?;
        Ok(UserAccess {
            name: user.clone(),
            roles: self.enforcer.effective_roles(user, &domains).await?,
            permissions: self.enforcer.effective_permissions(user, &domains).await?,
        })
    }

    #[instrument(skip(self, domains))]
    async fn users(&self, domains: &[Domain]) -> DomainResult<Vec<UserAccess>> {
        let domains = resolve_domains(self.directory.as_ref(), domains).await?;
        let mut tx = self.store.begin().await?;
        let mut names = Vec::new();
        for record in tx.list_users().await? {
            // users stay on record after their last role is removed
            if !record.name.is_noop() && tx.user_has_assignments(record.id).await? {
                names.push(record.name);
            }
        }
        // release the store before per-user reads
        drop(tx);

        let mut users = Vec::with_capacity(names.len());
        for name in names {
            users.push(self.user(&name, &domains).await?);
        }
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn user_roles(&self, user: &User, domains: &[Domain]) -> DomainResult<RoleCollection> {
        self.enforcer.effective_roles(user, domains).await
    }

    async fn user_permissions(
        &self,
        user: &User,
        domains: &[Domain],
    ) -> DomainResult<UserPermissionCollection> {
        self.enforcer.effective_permissions(user, domains).await
    }

    async fn domains(&self) -> DomainResult<Vec<Domain>> {
        all_domains(self.directory.as_ref()).await
    }

    async fn domain_exists(&self, domain: &Domain) -> DomainResult<bool> {
        domain_is_known(self.directory.as_ref(), domain).await
    }
}
