use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use casbin::{CoreApi, Enforcer, MgmtApi};
use tracing::{debug, instrument};

use crate::auth::{
    AdapterFactory, PolicyCache, ALLOW_EFFECT, GROUPING_DOMAIN, GROUPING_ROLE, POLICY_PERMISSION,
    POLICY_RESOURCE,
};
use crate::domain::{
    domain_is_known, resolve_domains, Domain, DomainError, DomainResult, Enforcement, Permission,
    Resource, ResourceAccess, Role, RoleCollection, TenantDirectory, User,
    UserPermissionCollection,
};

/// Enforcement backed by the casbin policy snapshot held in a `PolicyCache`.
pub struct CasbinEnforcer<F: AdapterFactory> {
    cache: Arc<PolicyCache<F>>,
    directory: Arc<dyn TenantDirectory>,
}

impl<F: AdapterFactory> Clone for CasbinEnforcer<F> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<F: AdapterFactory> CasbinEnforcer<F> {
    pub fn new(cache: Arc<PolicyCache<F>>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self { cache, directory }
    }

    async fn require_known_domain(&self, domain: &Domain) -> DomainResult<()> {
        if !domain_is_known(self.directory.as_ref(), domain).await? {
            return Err(DomainError::InvalidDomain(domain.to_string()));
        }
        Ok(())
    }
}

pub(crate) fn casbin_error(context: &'static str) -> impl Fn(casbin::Error) -> DomainError {
    move |e| DomainError::AuthorizationError(format!("{}: {}", context, e))
}

/// Whether `name` is a role in any domain. Role names are never users.
pub(crate) fn is_role_name(enforcer: &Enforcer, name: &str) -> bool {
    !enforcer
        .get_filtered_grouping_policy(GROUPING_ROLE, vec![name.to_string()])
        .is_empty()
}

fn enforce(
    enforcer: &Enforcer,
    user: &User,
    domain: &Domain,
    resource: &Resource,
    permission: &Permission,
) -> DomainResult<bool> {
    // casbin links every subject to itself, so a role name would match its own grants
    if is_role_name(enforcer, user.as_str()) {
        return Ok(false);
    }
    enforcer
        .enforce((
            user.as_str(),
            domain.as_str(),
            resource.as_str(),
            permission.as_str(),
        ))
        .map_err(casbin_error("Enforcement error"))
}

/// Sorted roles the user is assigned in `domain`.
pub(crate) fn roles_in_domain(enforcer: &Enforcer, user: &User, domain: &Domain) -> Vec<Role> {
    let mut roles: Vec<Role> = enforcer
        .get_filtered_grouping_policy(0, vec![user.to_string()])
        .into_iter()
        .filter(|rule| rule.get(GROUPING_DOMAIN).map(String::as_str) == Some(domain.as_str()))
        .filter_map(|rule| rule.get(GROUPING_ROLE).cloned())
        .map(Role::from)
        .collect();
    roles.sort();
    roles.dedup();
    roles
}

/// Allowed (resource, permission) pairs a role holds in `domain`.
pub(crate) fn role_grants(
    enforcer: &Enforcer,
    role: &Role,
    domain: &Domain,
) -> Vec<(Resource, Permission)> {
    enforcer
        .get_filtered_policy(0, vec![role.to_string(), domain.to_string()])
        .into_iter()
        .filter(|rule| rule.get(4).map_or(true, |effect| effect == ALLOW_EFFECT))
        .filter_map(|rule| {
            let resource = rule.get(POLICY_RESOURCE)?;
            let permission = rule.get(POLICY_PERMISSION)?;
            Some((
                Resource::from(resource.as_str()),
                Permission::from(permission.as_str()),
            ))
        })
        .collect()
}

#[async_trait]
impl<F: AdapterFactory> Enforcement for CasbinEnforcer<F> {
    #[instrument(skip(self, permissions), fields(user = %user, domain = %domain))]
    async fn has_all(
        &self,
        user: &User,
        domain: &Domain,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        self.require_known_domain(domain).await?;

        let enforcer = self.cache.read().await?;
        let resource = Resource::global();
        for permission in permissions {
            if !enforce(&enforcer, user, domain, &resource, permission)? {
                debug!(permission = %permission, "permission denied");
                return Err(DomainError::Forbidden {
                    user: user.to_string(),
                    permission: permission.to_string(),
                });
            }
        }
        Ok(())
    }

    #[instrument(skip(self, resources), fields(user = %user, domain = %domain, permission = %permission))]
    async fn has_resources(
        &self,
        user: &User,
        domain: &Domain,
        permission: &Permission,
        resources: &[Resource],
    ) -> DomainResult<ResourceAccess> {
        self.require_known_domain(domain).await?;

        let enforcer = self.cache.read().await?;
        let mut missing = Vec::new();
        for resource in resources {
            if !enforce(&enforcer, user, domain, resource, permission)? {
                missing.push(resource.clone());
            }
        }
        Ok(ResourceAccess::from_missing(missing))
    }

    #[instrument(skip(self, domains), fields(user = %user))]
    async fn effective_roles(
        &self,
        user: &User,
        domains: &[Domain],
    ) -> DomainResult<RoleCollection> {
        let domains = resolve_domains(self.directory.as_ref(), domains).await?;
        let mut collection = RoleCollection::new();
        if user.is_noop() {
            return Ok(collection);
        }

        let enforcer = self.cache.read().await?;
        for domain in domains {
            let roles = roles_in_domain(&enforcer, user, &domain);
            if !roles.is_empty() {
                collection.insert(domain, roles);
            }
        }
        Ok(collection)
    }

    #[instrument(skip(self, domains), fields(user = %user))]
    async fn effective_permissions(
        &self,
        user: &User,
        domains: &[Domain],
    ) -> DomainResult<UserPermissionCollection> {
        let domains = resolve_domains(self.directory.as_ref(), domains).await?;
        let mut collection = UserPermissionCollection::new();
        if user.is_noop() {
            return Ok(collection);
        }

        let enforcer = self.cache.read().await?;
        for domain in domains {
            let mut by_resource: BTreeMap<Resource, Vec<Permission>> = BTreeMap::new();
            for role in roles_in_domain(&enforcer, user, &domain) {
                for (resource, permission) in role_grants(&enforcer, &role, &domain) {
                    by_resource.entry(resource).or_default().push(permission);
                }
            }
            for permissions in by_resource.values_mut() {
                permissions.sort();
                permissions.dedup();
            }
            if !by_resource.is_empty() {
                collection.insert(domain, by_resource);
            }
        }
        Ok(collection)
    }
}
