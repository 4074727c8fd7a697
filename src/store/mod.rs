//! Persistence for entities and grants. Every function takes the connection
//! of the caller's transaction.

pub mod create_grants;
pub mod domain_grants;
pub mod grants;
pub mod identity;
