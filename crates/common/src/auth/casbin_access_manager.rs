use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use casbin::{Enforcer, MgmtApi};
use tracing::{debug, instrument};

use crate::auth::{
    casbin_error, grant_rule, is_role_name, membership_rule, role_grants, AdapterFactory,
    CasbinEnforcer, PolicyCache, GROUPING_DOMAIN, GROUPING_ROLE, GROUPING_USER, POLICY_ROLE,
};
use crate::domain::{
    all_domains, domain_is_known, normalize_role_permissions, resolve_domains, AccessManager,
    Domain, DomainError, DomainResult, Enforcement, NewRoleRequest, Permission, Resource, Role,
    RoleCollection, RolePermissionCollection, TenantDirectory, User, UserAccess,
    UserPermissionCollection,
};

/// Access management over a casbin policy.
///
/// A role exists in a domain exactly when the placeholder identity `noop` is a member
/// of it there. The matcher never grants `noop` anything.
///
/// Users and roles share casbin's subject namespace, so a name is never both. Each
/// mutation is applied as one batch and the snapshot is reloaded if saving it fails.
pub struct CasbinAccessManager<F: AdapterFactory> {
    cache: Arc<PolicyCache<F>>,
    directory: Arc<dyn TenantDirectory>,
    enforcer: CasbinEnforcer<F>,
}

impl<F: AdapterFactory> CasbinAccessManager<F> {
    pub fn new(cache: Arc<PolicyCache<F>>, directory: Arc<dyn TenantDirectory>) -> Self {
        let enforcer = CasbinEnforcer::new(Arc::clone(&cache), Arc::clone(&directory));
        Self {
            cache,
            directory,
            enforcer,
        }
    }

    /// Enforcement over the same policy snapshot.
    pub fn enforcer(&self) -> &CasbinEnforcer<F> {
        &self.enforcer
    }

    async fn require_domain(&self, domain: &Domain) -> DomainResult<()> {
        if !domain_is_known(self.directory.as_ref(), domain).await? {
            return Err(DomainError::DomainNotFound(domain.to_string()));
        }
        Ok(())
    }
}

fn role_is_witnessed(enforcer: &Enforcer, domain: &Domain, role: &Role) -> bool {
    enforcer.has_grouping_policy(membership_rule(&User::noop(), role, domain))
}

fn require_role(enforcer: &Enforcer, domain: &Domain, role: &Role) -> DomainResult<()> {
    if !role_is_witnessed(enforcer, domain, role) {
        return Err(DomainError::RoleNotFound(role.to_string()));
    }
    Ok(())
}

/// Whether `name` is assigned to any role, the placeholder included.
fn is_user_name(enforcer: &Enforcer, name: &str) -> bool {
    !enforcer
        .get_filtered_grouping_policy(GROUPING_USER, vec![name.to_string()])
        .is_empty()
}

fn require_assignable(enforcer: &Enforcer, user: &User) -> DomainResult<()> {
    if user.is_noop() {
        return Err(DomainError::ValidationError(format!(
            "user name {} is reserved",
            user
        )));
    }
    if is_role_name(enforcer, user.as_str()) {
        return Err(DomainError::ValidationError(format!(
            "{} is a role name",
            user
        )));
    }
    Ok(())
}

/// Distinct rules whose presence in the policy matches `present`.
///
/// casbin batch calls change nothing when any rule is already there (or, for removal,
/// absent), so batches are filtered first.
fn rules_where(
    rules: impl IntoIterator<Item = Vec<String>>,
    present: bool,
    exists: impl Fn(Vec<String>) -> bool,
) -> Vec<Vec<String>> {
    let mut rules: Vec<Vec<String>> = rules
        .into_iter()
        .filter(|rule| exists(rule.clone()) == present)
        .collect();
    rules.sort();
    rules.dedup();
    rules
}

/// Real members of a role, sorted.
fn members(enforcer: &Enforcer, domain: &Domain, role: &Role) -> Vec<User> {
    let mut users: Vec<User> = enforcer
        .get_filtered_grouping_policy(GROUPING_ROLE, vec![role.to_string(), domain.to_string()])
        .into_iter()
        .filter_map(|rule| rule.get(GROUPING_USER).cloned())
        .map(User::from)
        .filter(|user| !user.is_noop())
        .collect();
    users.sort();
    users.dedup();
    users
}

#[async_trait]
impl<F: AdapterFactory> AccessManager for CasbinAccessManager<F> {
    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn add_role(&self, domain: &Domain, role: &Role) -> DomainResult<()> {
        NewRoleRequest::new(domain, role).validate_request()?;
        self.require_domain(domain).await?;

        let mut enforcer = self.cache.write().await?;
        if role_is_witnessed(&enforcer, domain, role) {
            return Err(DomainError::RoleAlreadyExists(role.to_string()));
        }
        if is_user_name(&enforcer, role.as_str()) {
            return Err(DomainError::ValidationError(format!(
                "role name {} is already used by a user",
                role
            )));
        }
        enforcer
            .add_grouping_policy(membership_rule(&User::noop(), role, domain))
            .await
            .map_err(casbin_error("Failed to add role"))?;
        self.cache.persist(&mut enforcer).await?;

        debug!("role created");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_exists(&self, domain: &Domain, role: &Role) -> DomainResult<bool> {
        let enforcer = self.cache.read().await?;
        Ok(role_is_witnessed(&enforcer, domain, role))
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn delete_role(&self, domain: &Domain, role: &Role) -> DomainResult<bool> {
        let mut enforcer = self.cache.write().await?;
        if !role_is_witnessed(&enforcer, domain, role) {
            return Ok(false);
        }
        if !members(&enforcer, domain, role).is_empty() {
            return Err(DomainError::RoleHasUsers(role.to_string()));
        }

        enforcer
            .remove_filtered_grouping_policy(
                GROUPING_ROLE,
                vec![role.to_string(), domain.to_string()],
            )
            .await
            .map_err(casbin_error("Failed to delete role"))?;
        enforcer
            .remove_filtered_policy(POLICY_ROLE, vec![role.to_string(), domain.to_string()])
            .await
            .map_err(casbin_error("Failed to delete role permissions"))?;
        self.cache.persist(&mut enforcer).await?;

        debug!("role deleted");
        Ok(true)
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn roles(&self, domain: &Domain) -> DomainResult<Vec<Role>> {
        self.require_domain(domain).await?;

        let enforcer = self.cache.read().await?;
        let roles: BTreeSet<Role> = enforcer
            .get_grouping_policy()
            .into_iter()
            .filter(|rule| rule.get(GROUPING_DOMAIN).map(String::as_str) == Some(domain.as_str()))
            .filter_map(|rule| rule.get(GROUPING_ROLE).cloned())
            .map(Role::from)
            .collect();
        Ok(roles.into_iter().collect())
    }

    #[instrument(skip(self, roles), fields(domain = %domain, user = %user))]
    async fn add_user_roles(
        &self,
        domain: &Domain,
        user: &User,
        roles: &[Role],
    ) -> DomainResult<()> {
        let mut enforcer = self.cache.write().await?;
        require_assignable(&enforcer, user)?;
        for role in roles {
            require_role(&enforcer, domain, role)?;
        }
        let rules = rules_where(
            roles.iter().map(|role| membership_rule(user, role, domain)),
            false,
            |rule| enforcer.has_grouping_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .add_grouping_policies(rules)
                .await
                .map_err(casbin_error("Failed to assign role"))?;
            self.cache.persist(&mut enforcer).await?;
        }

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
        let mut enforcer = self.cache.write().await?;
        for user in users {
            require_assignable(&enforcer, user)?;
        }
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            users.iter().map(|user| membership_rule(user, role, domain)),
            false,
            |rule| enforcer.has_grouping_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .add_grouping_policies(rules)
                .await
                .map_err(casbin_error("Failed to assign role"))?;
            self.cache.persist(&mut enforcer).await?;
        }

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
        if user.is_noop() {
            return Ok(());
        }

        let mut enforcer = self.cache.write().await?;
        let rules = rules_where(
            roles.iter().map(|role| membership_rule(user, role, domain)),
            true,
            |rule| enforcer.has_grouping_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .remove_grouping_policies(rules)
                .await
                .map_err(casbin_error("Failed to remove role"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, users), fields(domain = %domain, role = %role))]
    async fn delete_role_users(
        &self,
        domain: &Domain,
        role: &Role,
        users: &[User],
    ) -> DomainResult<()> {
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            users
                .iter()
                .filter(|user| !user.is_noop())
                .map(|user| membership_rule(user, role, domain)),
            true,
            |rule| enforcer.has_grouping_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .remove_grouping_policies(rules)
                .await
                .map_err(casbin_error("Failed to remove role"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, permissions), fields(domain = %domain, role = %role))]
    async fn add_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        let resource = Resource::global();
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            permissions
                .iter()
                .map(|permission| grant_rule(role, domain, &resource, permission)),
            false,
            |rule| enforcer.has_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .add_policies(rules)
                .await
                .map_err(casbin_error("Failed to add permission"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, resources), fields(domain = %domain, role = %role, permission = %permission))]
    async fn add_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()> {
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            resources
                .iter()
                .map(|resource| grant_rule(role, domain, resource, permission)),
            false,
            |rule| enforcer.has_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .add_policies(rules)
                .await
                .map_err(casbin_error("Failed to add permission"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, permissions), fields(domain = %domain, role = %role))]
    async fn delete_role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        let resource = Resource::global();
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            permissions
                .iter()
                .map(|permission| grant_rule(role, domain, &resource, permission)),
            true,
            |rule| enforcer.has_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .remove_policies(rules)
                .await
                .map_err(casbin_error("Failed to delete permission"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, resources), fields(domain = %domain, role = %role, permission = %permission))]
    async fn delete_role_permission_resources(
        &self,
        domain: &Domain,
        role: &Role,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<()> {
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            resources
                .iter()
                .map(|resource| grant_rule(role, domain, resource, permission)),
            true,
            |rule| enforcer.has_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .remove_policies(rules)
                .await
                .map_err(casbin_error("Failed to delete permission"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn delete_all_role_permissions(&self, domain: &Domain, role: &Role) -> DomainResult<()> {
        let mut enforcer = self.cache.write().await?;
        require_role(&enforcer, domain, role)?;
        let rules = rules_where(
            role_grants(&enforcer, role, domain)
                .iter()
                .map(|(resource, permission)| grant_rule(role, domain, resource, permission)),
            true,
            |rule| enforcer.has_policy(rule),
        );
        if !rules.is_empty() {
            enforcer
                .remove_policies(rules)
                .await
                .map_err(casbin_error("Failed to delete permissions"))?;
            self.cache.persist(&mut enforcer).await?;
        }
        debug!("role permissions cleared");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_users(&self, domain: &Domain, role: &Role) -> DomainResult<Vec<User>> {
        let enforcer = self.cache.read().await?;
        require_role(&enforcer, domain, role)?;
        Ok(members(&enforcer, domain, role))
    }

    #[instrument(skip(self), fields(domain = %domain, role = %role))]
    async fn role_permissions(
        &self,
        domain: &Domain,
        role: &Role,
    ) -> DomainResult<RolePermissionCollection> {
        let enforcer = self.cache.read().await?;
        require_role(&enforcer, domain, role)?;

        let mut collection = RolePermissionCollection::new();
        for (resource, permission) in role_grants(&enforcer, role, domain) {
            collection.entry(permission).or_default().push(resource);
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

        let names: BTreeSet<User> = {
            let enforcer = self.cache.read().await?;
            let grouping = enforcer.get_grouping_policy();
            let policy = enforcer.get_policy();
            // subjects that are themselves roles are not users
            let mut role_names: BTreeSet<&str> = grouping
                .iter()
                .filter_map(|rule| rule.get(GROUPING_ROLE).map(String::as_str))
                .collect();
            role_names.extend(
                policy
                    .iter()
                    .filter_map(|rule| rule.get(POLICY_ROLE).map(String::as_str)),
            );

            let names: BTreeSet<User> = grouping
                .iter()
                .filter_map(|rule| rule.get(GROUPING_USER))
                .filter(|name| !role_names.contains(name.as_str()))
                .map(|name| User::from(name.as_str()))
                .filter(|user| !user.is_noop())
                .collect();
            names
        };

        let mut users = Vec::with_capacity(names.len());
        for name in names {
            users.push(self.user(&name, &domains).await?);
        }
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
