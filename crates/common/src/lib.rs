pub mod auth;
pub mod domain;
pub mod garde;
pub mod memory;
pub mod store;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockAccessManager;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEnforcement;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTenantDirectory;
