use std::collections::BTreeSet;
use std::sync::Arc;

use common::domain::{
    normalize_role_permissions, AccessManager, Domain, DomainResult, Permission, PermissionScope,
    Resource, ResourceCatalog, Role, RolePermissionCollection,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{exclude, RoleConfig};

/// One permission's resources added to or removed from a role in a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantChange {
    pub domain: Domain,
    pub role: Role,
    pub permission: Permission,
    pub resources: Vec<Resource>,
}

/// Mutations applied by a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub roles_created: Vec<(Domain, Role)>,
    pub roles_removed: Vec<(Domain, Role)>,
    pub grants_added: Vec<GrantChange>,
    pub grants_removed: Vec<GrantChange>,
}

impl ReconciliationReport {
    pub fn is_empty(&self) -> bool {
        self.roles_created.is_empty()
            && self.roles_removed.is_empty()
            && self.grants_added.is_empty()
            && self.grants_removed.is_empty()
    }
}

/// A validated role with its grants split by resource scope.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RolePlan {
    role: Role,
    global: RolePermissionCollection,
    domain: RolePermissionCollection,
}

impl RolePlan {
    fn desired_for(&self, domain: &Domain) -> &RolePermissionCollection {
        if domain.is_global() {
            &self.global
        } else {
            &self.domain
        }
    }
}

/// Drives live policy state towards a declarative `RoleConfig`.
pub struct ReconciliationService {
    access_manager: Arc<dyn AccessManager>,
    catalog: Arc<ResourceCatalog>,
}

impl ReconciliationService {
    pub fn new(access_manager: Arc<dyn AccessManager>, catalog: Arc<ResourceCatalog>) -> Self {
        Self {
            access_manager,
            catalog,
        }
    }

    /// Prunes roles absent from `config`, then creates missing roles and diffs grants in
    /// every domain. Nothing is mutated when the configuration fails validation.
    #[instrument(skip(self, config), fields(role_count = config.roles.len()))]
    pub async fn reconcile(&self, config: &RoleConfig) -> DomainResult<ReconciliationReport> {
        let plans = self.plan(config)?;
        let domains = self.access_manager.domains().await?;
        let mut report = ReconciliationReport::default();

        self.prune(&plans, &domains, &mut report).await?;
        for domain in &domains {
            for plan in &plans {
                self.apply(domain, plan, &mut report).await?;
            }
        }

        debug!(
            roles_created = report.roles_created.len(),
            roles_removed = report.roles_removed.len(),
            grants_added = report.grants_added.len(),
            grants_removed = report.grants_removed.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    fn plan(&self, config: &RoleConfig) -> DomainResult<Vec<RolePlan>> {
        config.validate_config()?;

        let mut definitions = Vec::with_capacity(config.roles.len() + 1);
        for definition in &config.roles {
            if definition.name.is_administrator() {
                warn!("configured Administrator role replaced by the catalog-wide definition");
                continue;
            }
            definitions.push((definition.name.clone(), definition.permissions.clone()));
        }
        definitions.push((Role::administrator(), self.catalog.list()));

        let mut plans = Vec::with_capacity(definitions.len());
        for (role, permissions) in definitions {
            let mut global = RolePermissionCollection::new();
            let mut domain = RolePermissionCollection::new();
            for (permission, resources) in &permissions {
                for resource in resources {
                    let bucket = match self.catalog.validate_grant(&role, permission, resource)? {
                        PermissionScope::Global => &mut global,
                        PermissionScope::Domain => &mut domain,
                    };
                    bucket
                        .entry(permission.clone())
                        .or_default()
                        .push(resource.clone());
                }
            }
            plans.push(RolePlan {
                role,
                global: normalize_role_permissions(global),
                domain: normalize_role_permissions(domain),
            });
        }
        Ok(plans)
    }

    async fn prune(
        &self,
        plans: &[RolePlan],
        domains: &[Domain],
        report: &mut ReconciliationReport,
    ) -> DomainResult<()> {
        let desired: BTreeSet<&Role> = plans.iter().map(|plan| &plan.role).collect();

        for domain in domains {
            for role in self.access_manager.roles(domain).await? {
                if desired.contains(&role) {
                    continue;
                }
                if self.access_manager.delete_role(domain, &role).await? {
                    info!(domain = %domain, role = %role, "removed role");
                    report.roles_removed.push((domain.clone(), role));
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        domain: &Domain,
        plan: &RolePlan,
        report: &mut ReconciliationReport,
    ) -> DomainResult<()> {
        let role = &plan.role;
        if !self.access_manager.role_exists(domain, role).await? {
            self.access_manager.add_role(domain, role).await?;
            info!(domain = %domain, role = %role, "created role");
            report.roles_created.push((domain.clone(), role.clone()));
        }

        let desired = plan.desired_for(domain);
        let current = self.access_manager.role_permissions(domain, role).await?;
        let to_add = exclude(desired, &current);
        let to_remove = exclude(&current, desired);

        for (permission, resources) in to_add {
            self.access_manager
                .add_role_permission_resources(domain, role, &permission, &resources)
                .await?;
            info!(
                domain = %domain,
                role = %role,
                permission = %permission,
                resources = ?resources,
                "added grants"
            );
            report.grants_added.push(GrantChange {
                domain: domain.clone(),
                role: role.clone(),
                permission,
                resources,
            });
        }

        for (permission, resources) in to_remove {
            self.access_manager
                .delete_role_permission_resources(domain, role, &permission, &resources)
                .await?;
            info!(
                domain = %domain,
                role = %role,
                permission = %permission,
                resources = ?resources,
                "removed grants"
            );
            report.grants_removed.push(GrantChange {
                domain: domain.clone(),
                role: role.clone(),
                permission,
                resources,
            });
        }
        Ok(())
    }
}
