mod access_manager;
mod access_types;
mod enforcement;
mod policy_store;
mod resource_catalog;
mod result;
mod tenant_directory;
mod user_access;

pub use access_manager::*;
pub use access_types::*;
pub use enforcement::*;
pub use policy_store::*;
pub use resource_catalog::*;
pub use result::*;
pub use tenant_directory::*;
pub use user_access::*;
