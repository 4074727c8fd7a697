pub mod authz;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod initializer;
pub mod models;
pub(crate) mod store;

// Re-export commonly used items for embedders and tests
pub use authz::{AccessControlContext, SessionState};
pub use config::EngineConfig;
pub use credentials::PasswordCredentials;
pub use errors::{AccessError, AccessResult};
pub use initializer::initialize;
pub use models::permission::{
    DomainCreatePermission, DomainPermission, PermissionName, ResourceCreatePermission, ResourcePermission,
    SystemPermission,
};
pub use models::resource::{Resource, ResourceClassInfo};
