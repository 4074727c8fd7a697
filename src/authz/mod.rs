//! Authorization engine.
//!
//! - `hierarchy`: INHERIT and domain-tree closures
//! - `resolver`: effective permissions with super-user short-circuit
//! - `session`: authenticated and impersonated identity
//! - [`AccessControlContext`]: the public operations (checks, queries, grants,
//!   administration)

mod admin;
mod checks;
mod context;
mod mutations;
mod validation;

pub(crate) mod hierarchy;
pub(crate) mod resolver;
pub mod session;

pub use context::AccessControlContext;
pub use session::SessionState;
