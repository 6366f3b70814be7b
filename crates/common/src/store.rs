mod condition_policy;
mod store_access_manager;
mod store_enforcer;

pub use condition_policy::*;
pub use store_access_manager::*;
pub use store_enforcer::*;
