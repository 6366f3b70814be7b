use common::domain::Domain;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    /// Casbin CSV policy file, created if missing
    #[serde(default = "default_policy_file")]
    pub policy_file: String,

    /// JSON document listing resources, their scope and permissions
    #[serde(default = "default_resource_catalog_file")]
    pub resource_catalog_file: String,

    /// JSON document with the desired roles
    #[serde(default = "default_role_config_file")]
    pub role_config_file: String,

    /// Tenant domains (comma-separated)
    #[serde(default)]
    pub tenants: String,

    /// Seconds before the loaded policy snapshot is considered stale
    #[serde(default = "default_policy_cache_ttl_secs")]
    pub policy_cache_ttl_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_policy_file() -> String {
    "policy.csv".to_string()
}

fn default_resource_catalog_file() -> String {
    "catalog.json".to_string()
}

fn default_role_config_file() -> String {
    "roles.json".to_string()
}

fn default_policy_cache_ttl_secs() -> u64 {
    60
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("WARDEN"))
            .build()?
            .try_deserialize()
    }

    /// Parses the comma-separated tenant list, skipping blanks and `global`.
    pub fn tenant_domains(&self) -> Vec<Domain> {
        self.tenants
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Domain::from)
            .filter(|domain| !domain.is_global())
            .collect()
    }
}
