mod adapter_factory;
mod casbin_access_manager;
mod casbin_enforcer;
mod policy_cache;
mod rbac_model;

pub use adapter_factory::*;
pub use casbin_access_manager::*;
pub use casbin_enforcer::*;
pub use policy_cache::*;
pub use rbac_model::*;
