mod permission_diff;
mod reconciliation_service;
mod role_config;

pub use permission_diff::*;
pub use reconciliation_service::*;
pub use role_config::*;
