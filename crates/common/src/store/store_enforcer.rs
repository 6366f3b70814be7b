use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::domain::{
    domain_is_known, resolve_domains, Domain, DomainError, DomainResult, Enforcement, Permission,
    PolicyStore, Resource, ResourceAccess, RoleCollection, TenantDirectory, User,
    UserPermissionCollection,
};
use crate::store::ConditionPolicy;

/// Enforcement answered by the policy store's aggregate permission query.
#[derive(Clone)]
pub struct StoreEnforcer {
    store: Arc<dyn PolicyStore>,
    directory: Arc<dyn TenantDirectory>,
    conditions: ConditionPolicy,
}

impl StoreEnforcer {
    pub fn new(store: Arc<dyn PolicyStore>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            store,
            directory,
            conditions: ConditionPolicy::default(),
        }
    }

    pub fn with_condition_policy(mut self, conditions: ConditionPolicy) -> Self {
        self.conditions = conditions;
        self
    }

    async fn require_known_domain(&self, domain: &Domain) -> DomainResult<()> {
        if !domain_is_known(self.directory.as_ref(), domain).await? {
            return Err(DomainError::InvalidDomain(domain.to_string()));
        }
        Ok(())
    }

    async fn grants(
        &self,
        user: &User,
        domain: &Domain,
        resource: &Resource,
        permission: &Permission,
    ) -> DomainResult<bool> {
        if user.is_noop() {
            return Ok(false);
        }
        let Some(grant) = self
            .store
            .check_permission(user, domain, resource, permission)
            .await?
        else {
            return Ok(false);
        };

        let honored = self.conditions.honors(grant.condition.as_deref());
        if !honored {
            warn!(
                role_map_id = grant.role_map_id,
                condition = grant.condition.as_deref().unwrap_or_default(),
                "conditional grant not honored"
            );
        }
        Ok(honored)
    }
}

#[async_trait]
impl Enforcement for StoreEnforcer {
    #[instrument(skip(self, permissions), fields(user = %user, domain = %domain))]
    async fn has_all(
        &self,
        user: &User,
        domain: &Domain,
        permissions: &[Permission],
    ) -> DomainResult<()> {
        self.require_known_domain(domain).await?;

        let resource = Resource::global();
        for permission in permissions {
            if !self.grants(user, domain, &resource, permission).await? {
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

        let mut missing = Vec::new();
        for resource in resources {
            if !self.grants(user, domain, resource, permission).await? {
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

        let mut tx = self.store.begin().await?;
        let Some(record) = tx.user_by_name(user).await? else {
            return Ok(collection);
        };
        for domain in domains {
            let roles: Vec<_> = tx
                .list_user_roles(record.id, &domain)
                .await?
                .into_iter()
                .map(|role| role.name)
                .collect();
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

        let mut tx = self.store.begin().await?;
        let Some(record) = tx.user_by_name(user).await? else {
            return Ok(collection);
        };
        for domain in domains {
            let mut by_resource: BTreeMap<Resource, Vec<Permission>> = BTreeMap::new();
            for role in tx.list_user_roles(record.id, &domain).await? {
                for grant in tx.list_role_grants(role.id).await? {
                    by_resource
                        .entry(grant.resource)
                        .or_default()
                        .push(grant.permission);
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
