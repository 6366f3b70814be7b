mod in_memory_policy_store;
mod static_tenant_directory;

pub use in_memory_policy_store::*;
pub use static_tenant_directory::*;
