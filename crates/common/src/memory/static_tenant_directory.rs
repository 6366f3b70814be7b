use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Domain, DomainResult, TenantDirectory};

/// Tenant directory backed by a fixed, mutable set of identifiers.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    tenants: Arc<RwLock<BTreeSet<Domain>>>,
}

impl StaticTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = Domain>) -> Self {
        let tenants = tenants
            .into_iter()
            .filter(|domain| !domain.is_global() && !domain.as_str().is_empty())
            .collect();
        Self {
            tenants: Arc::new(RwLock::new(tenants)),
        }
    }

    pub async fn add(&self, domain: Domain) {
        if !domain.is_global() {
            self.tenants.write().await.insert(domain);
        }
    }

    pub async fn remove(&self, domain: &Domain) -> bool {
        self.tenants.write().await.remove(domain)
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn domain_ids(&self) -> DomainResult<Vec<Domain>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().cloned().collect())
    }

    async fn domain_exists(&self, domain: &Domain) -> DomainResult<bool> {
        let tenants = self.tenants.read().await;
        Ok(tenants.contains(domain))
    }
}
