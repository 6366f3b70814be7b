mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::auth::{CasbinAccessManager, FileAdapterFactory, PolicyCache};
use common::domain::{ResourceCatalog, TenantDirectory};
use common::memory::StaticTenantDirectory;
use common::telemetry::{init_telemetry, TelemetryConfig};
use config::ServiceConfig;
use reconciler::{ReconciliationReport, ReconciliationService, RoleConfig};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: "warden".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    }) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(
        policy_file = %config.policy_file,
        role_config_file = %config.role_config_file,
        "Starting warden reconciliation"
    );
    debug!("Configuration: {:?}", config);

    match reconcile_from_files(&config).await {
        Ok(report) if report.is_empty() => info!("policy already matches role configuration"),
        Ok(report) => info!(
            roles_created = report.roles_created.len(),
            roles_removed = report.roles_removed.len(),
            grants_added = report.grants_added.len(),
            grants_removed = report.grants_removed.len(),
            "policy reconciled"
        ),
        Err(e) => {
            error!("Reconciliation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Binds the file-backed policy, applies the role configuration and persists the result.
async fn reconcile_from_files(config: &ServiceConfig) -> Result<ReconciliationReport> {
    let catalog_json = tokio::fs::read_to_string(&config.resource_catalog_file)
        .await
        .with_context(|| format!("reading {}", config.resource_catalog_file))?;
    let catalog = ResourceCatalog::from_json(&catalog_json)?;

    let roles_json = tokio::fs::read_to_string(&config.role_config_file)
        .await
        .with_context(|| format!("reading {}", config.role_config_file))?;
    let roles = RoleConfig::from_json(&roles_json)?;

    let directory: Arc<dyn TenantDirectory> =
        Arc::new(StaticTenantDirectory::new(config.tenant_domains()));
    let cache = Arc::new(PolicyCache::new(
        FileAdapterFactory::new(&config.policy_file),
        Duration::from_secs(config.policy_cache_ttl_secs),
    ));
    cache
        .refresh()
        .await
        .with_context(|| format!("loading policy from {}", config.policy_file))?;

    let manager = Arc::new(CasbinAccessManager::new(cache.clone(), directory));
    let service = ReconciliationService::new(manager, Arc::new(catalog));

    let result = service.reconcile(&roles).await;
    cache.shutdown();
    Ok(result?)
}
