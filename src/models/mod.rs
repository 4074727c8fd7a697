pub mod permission;
pub mod resource;
