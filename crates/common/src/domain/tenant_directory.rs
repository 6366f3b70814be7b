use async_trait::async_trait;

use super::{Domain, DomainResult};

/// Source of truth for which tenant domains exist.
///
/// `global` is never listed here; it exists implicitly.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Identifiers of every known tenant.
    async fn domain_ids(&self) -> DomainResult<Vec<Domain>>;

    /// Whether a tenant with this identifier exists.
    async fn domain_exists(&self, domain: &Domain) -> DomainResult<bool>;
}

/// `global` followed by every tenant domain.
pub async fn all_domains(directory: &dyn TenantDirectory) -> DomainResult<Vec<Domain>> {
    let mut domains = vec![Domain::global()];
    for domain in directory.domain_ids().await? {
        if !domain.is_global() && !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    Ok(domains)
}

/// Whether `domain` is `global` or a known tenant.
pub async fn domain_is_known(directory: &dyn TenantDirectory, domain: &Domain) -> DomainResult<bool> {
    if domain.is_global() {
        return Ok(true);
    }
    directory.domain_exists(domain).await
}

/// The requested domains, or every domain when none were requested.
pub async fn resolve_domains(
    directory: &dyn TenantDirectory,
    requested: &[Domain],
) -> DomainResult<Vec<Domain>> {
    if requested.is_empty() {
        return all_domains(directory).await;
    }
    let mut domains = Vec::with_capacity(requested.len());
    for domain in requested {
        if !domains.contains(domain) {
            domains.push(domain.clone());
        }
    }
    Ok(domains)
}
