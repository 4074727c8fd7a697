use std::fmt;

use serde::{Deserialize, Serialize};

pub type ResourceId = i64;
pub type DomainId = i64;
pub type ResourceClassId = i64;

pub const SYSTEM_RESOURCE_ID: ResourceId = 0;
pub const SYSTEM_DOMAIN_ID: DomainId = 0;
pub const SYSTEM_RESOURCE_CLASS_ID: ResourceClassId = 0;
pub const SYSTEM_DOMAIN: &str = "SYSDOMAIN";
pub const SYSTEM_RESOURCE_CLASS: &str = "SYSOBJECT";

/// Reference to a resource by internal id, external id, or both.
///
/// Values handed out by the engine are always fully resolved; values built by
/// callers may carry only one of the two identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    id: Option<ResourceId>,
    external_id: Option<String>,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id: Some(id),
            external_id: None,
        }
    }

    pub fn from_external_id(external_id: impl Into<String>) -> Self {
        Self {
            id: None,
            external_id: Some(external_id.into()),
        }
    }

    pub fn with_external_id(id: ResourceId, external_id: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            external_id: Some(external_id.into()),
        }
    }

    pub(crate) fn resolved(id: ResourceId, external_id: Option<String>) -> Self {
        Self {
            id: Some(id),
            external_id,
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_RESOURCE_ID)
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.id
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.id == Some(SYSTEM_RESOURCE_ID)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.external_id) {
            (Some(id), Some(ext)) => write!(f, "{{resourceId: {id}, externalId: {ext}}}"),
            (Some(id), None) => write!(f, "{{resourceId: {id}}}"),
            (None, Some(ext)) => write!(f, "{{externalId: {ext}}}"),
            (None, None) => write!(f, "{{}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClassInfo {
    pub resource_class_name: String,
    pub authenticatable: bool,
    pub unauthenticated_create_allowed: bool,
}

/// Resolved row of the `ResourceClass` table.
#[derive(Debug, Clone)]
pub(crate) struct ResourceClassRow {
    pub id: ResourceClassId,
    pub name: String,
    pub authenticatable: bool,
    pub unauthenticated_create_allowed: bool,
}

impl From<ResourceClassRow> for ResourceClassInfo {
    fn from(row: ResourceClassRow) -> Self {
        ResourceClassInfo {
            resource_class_name: row.name,
            authenticatable: row.authenticatable,
            unauthenticated_create_allowed: row.unauthenticated_create_allowed,
        }
    }
}

/// Canonical identity of a resolved resource together with its placement.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedResource {
    pub id: ResourceId,
    pub external_id: Option<String>,
    pub resource_class_id: ResourceClassId,
    pub domain_id: DomainId,
}

impl ResolvedResource {
    pub fn to_resource(&self) -> Resource {
        Resource::resolved(self.id, self.external_id.clone())
    }
}

/// Trim a caller-supplied name; blank names are treated as missing.
pub(crate) fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_whichever_ids_are_present() {
        assert_eq!(Resource::new(-999).to_string(), "{resourceId: -999}");
        assert_eq!(Resource::from_external_id("invalid").to_string(), "{externalId: invalid}");
        assert_eq!(
            Resource::with_external_id(4, "ext").to_string(),
            "{resourceId: 4, externalId: ext}"
        );
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(normalize_name("  Foo\t").as_deref(), Some("Foo"));
        assert_eq!(normalize_name(" \n "), None);
    }
}
