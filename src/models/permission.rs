use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Built-in permissions shared by every resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemPermission {
    Inherit,
    Impersonate,
    ResetCredentials,
    Query,
    Delete,
    SuperUser,
    CreateChildDomain,
    Create,
}

/// Where a permission is granted; decides which system permissions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Resource,
    Domain,
    ResourceCreate,
    DomainCreate,
}

pub const RESOURCE_SYSTEM_PERMISSIONS: [SystemPermission; 5] = [
    SystemPermission::Inherit,
    SystemPermission::Impersonate,
    SystemPermission::ResetCredentials,
    SystemPermission::Query,
    SystemPermission::Delete,
];

pub const DOMAIN_SYSTEM_PERMISSIONS: [SystemPermission; 3] = [
    SystemPermission::SuperUser,
    SystemPermission::CreateChildDomain,
    SystemPermission::Delete,
];

const ALL_SYSTEM_PERMISSIONS: [SystemPermission; 8] = [
    SystemPermission::Inherit,
    SystemPermission::Impersonate,
    SystemPermission::ResetCredentials,
    SystemPermission::Query,
    SystemPermission::Delete,
    SystemPermission::SuperUser,
    SystemPermission::CreateChildDomain,
    SystemPermission::Create,
];

impl SystemPermission {
    /// Stable id persisted in the `SysPermissionId` columns.
    pub const fn id(self) -> i64 {
        match self {
            SystemPermission::Inherit => 1,
            SystemPermission::Impersonate => 2,
            SystemPermission::ResetCredentials => 3,
            SystemPermission::Query => 4,
            SystemPermission::Delete => 5,
            SystemPermission::SuperUser => 6,
            SystemPermission::CreateChildDomain => 7,
            SystemPermission::Create => 8,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        ALL_SYSTEM_PERMISSIONS.into_iter().find(|p| p.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            SystemPermission::Inherit => "*INHERIT",
            SystemPermission::Impersonate => "*IMPERSONATE",
            SystemPermission::ResetCredentials => "*RESET-CREDENTIALS",
            SystemPermission::Query => "*QUERY",
            SystemPermission::Delete => "*DELETE",
            SystemPermission::SuperUser => "*SUPER-USER",
            SystemPermission::CreateChildDomain => "*CREATE-CHILD-DOMAIN",
            SystemPermission::Create => "*CREATE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        ALL_SYSTEM_PERMISSIONS.into_iter().find(|p| p.name() == name)
    }

    pub fn is_valid_for(self, scope: PermissionScope) -> bool {
        match scope {
            PermissionScope::Resource => RESOURCE_SYSTEM_PERMISSIONS.contains(&self),
            PermissionScope::Domain => DOMAIN_SYSTEM_PERMISSIONS.contains(&self),
            PermissionScope::ResourceCreate | PermissionScope::DomainCreate => {
                self == SystemPermission::Create
            }
        }
    }

    /// Only meaningful on resources that can log in.
    pub fn requires_authenticatable(self) -> bool {
        matches!(
            self,
            SystemPermission::Impersonate | SystemPermission::ResetCredentials
        )
    }
}

impl fmt::Display for SystemPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of a resource permission: a built-in system permission or a custom
/// permission defined by a resource class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionName {
    System(SystemPermission),
    Custom(String),
}

impl PermissionName {
    /// Trims the name and recognizes `*`-prefixed system permission names.
    pub fn new(name: impl AsRef<str>) -> Self {
        let trimmed = name.as_ref().trim();
        match SystemPermission::from_name(trimmed) {
            Some(system) => PermissionName::System(system),
            None => PermissionName::Custom(trimmed.to_string()),
        }
    }

    pub fn as_system(&self) -> Option<SystemPermission> {
        match self {
            PermissionName::System(p) => Some(*p),
            PermissionName::Custom(_) => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, PermissionName::System(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            PermissionName::System(p) => p.name(),
            PermissionName::Custom(name) => name,
        }
    }
}

impl From<SystemPermission> for PermissionName {
    fn from(value: SystemPermission) -> Self {
        PermissionName::System(value)
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a resource-create grant carries: the right to create, or a permission
/// the creator receives on each resource it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceCreateKind {
    Create,
    PostCreate(ResourcePermission),
}

/// Domain-create counterpart of [`ResourceCreateKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainCreateKind {
    Create,
    PostCreate(DomainPermission),
}

impl fmt::Display for ResourceCreateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceCreateKind::Create => f.write_str(SystemPermission::Create.name()),
            ResourceCreateKind::PostCreate(p) => write!(f, "[{p}]"),
        }
    }
}

impl fmt::Display for DomainCreateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainCreateKind::Create => f.write_str(SystemPermission::Create.name()),
            DomainCreateKind::PostCreate(p) => write!(f, "[{p}]"),
        }
    }
}

/// A permission together with its grant option.
///
/// `inherit_level` and `domain_level` record how far the grant travelled
/// (INHERIT hops, domain ancestors) when it was produced by the resolver. They
/// are diagnostics only: equality and hashing look at the permission and the
/// grant option, so `P` and `P /G` are distinct members of a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission<K> {
    kind: K,
    with_grant: bool,
    inherit_level: u32,
    domain_level: u32,
}

pub type ResourcePermission = Permission<PermissionName>;
pub type DomainPermission = Permission<SystemPermission>;
pub type ResourceCreatePermission = Permission<ResourceCreateKind>;
pub type DomainCreatePermission = Permission<DomainCreateKind>;

impl<K> Permission<K> {
    pub(crate) fn from_parts(kind: K, with_grant: bool) -> Self {
        Self {
            kind,
            with_grant,
            inherit_level: 0,
            domain_level: 0,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn is_with_grant(&self) -> bool {
        self.with_grant
    }

    pub fn inherit_level(&self) -> u32 {
        self.inherit_level
    }

    pub fn domain_level(&self) -> u32 {
        self.domain_level
    }

    pub(crate) fn with_levels(mut self, inherit_level: u32, domain_level: u32) -> Self {
        self.inherit_level = inherit_level;
        self.domain_level = domain_level;
        self
    }
}

/// What a held permission kind covers when checked against a requested one.
pub trait PermissionKind: PartialEq {
    fn covers(&self, requested: &Self) -> bool {
        self == requested
    }
}

impl PermissionKind for PermissionName {}

impl PermissionKind for SystemPermission {}

/// A held post-create entry covers a requested one when its inner permission
/// grants it.
impl PermissionKind for ResourceCreateKind {
    fn covers(&self, requested: &Self) -> bool {
        match (self, requested) {
            (ResourceCreateKind::Create, ResourceCreateKind::Create) => true,
            (ResourceCreateKind::PostCreate(held), ResourceCreateKind::PostCreate(wanted)) => {
                wanted.is_granted_by(held)
            }
            _ => false,
        }
    }
}

impl PermissionKind for DomainCreateKind {
    fn covers(&self, requested: &Self) -> bool {
        match (self, requested) {
            (DomainCreateKind::Create, DomainCreateKind::Create) => true,
            (DomainCreateKind::PostCreate(held), DomainCreateKind::PostCreate(wanted)) => wanted.is_granted_by(held),
            _ => false,
        }
    }
}

impl<K: PermissionKind> Permission<K> {
    /// True when `held` satisfies this requirement: a covering permission, and
    /// a grant option at least as strong.
    pub fn is_granted_by(&self, held: &Permission<K>) -> bool {
        held.kind.covers(&self.kind) && (!self.with_grant || held.with_grant)
    }

    pub fn is_satisfied_by<'a>(&self, held: impl IntoIterator<Item = &'a Permission<K>>) -> bool
    where
        K: 'a,
    {
        held.into_iter().any(|h| self.is_granted_by(h))
    }
}

impl<K: PartialEq> PartialEq for Permission<K> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.with_grant == other.with_grant
    }
}

impl<K: Eq> Eq for Permission<K> {}

impl<K: Hash> Hash for Permission<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.with_grant.hash(state);
    }
}

impl<K: fmt::Display> fmt::Display for Permission<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.with_grant {
            write!(f, "{} /G", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl ResourcePermission {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self::from_parts(PermissionName::new(name), false)
    }

    pub fn new_with_grant(name: impl AsRef<str>) -> Self {
        Self::from_parts(PermissionName::new(name), true)
    }

    pub fn system(permission: SystemPermission) -> Self {
        Self::from_parts(PermissionName::System(permission), false)
    }

    pub fn system_with_grant(permission: SystemPermission) -> Self {
        Self::from_parts(PermissionName::System(permission), true)
    }

    pub fn name(&self) -> &PermissionName {
        self.kind()
    }

    pub fn is_system_permission(&self) -> bool {
        self.kind().is_system()
    }
}

impl DomainPermission {
    pub fn new(permission: SystemPermission) -> Self {
        Self::from_parts(permission, false)
    }

    pub fn new_with_grant(permission: SystemPermission) -> Self {
        Self::from_parts(permission, true)
    }

    pub fn permission(&self) -> SystemPermission {
        *self.kind()
    }
}

impl ResourceCreatePermission {
    pub fn create() -> Self {
        Self::from_parts(ResourceCreateKind::Create, false)
    }

    pub fn create_with_grant() -> Self {
        Self::from_parts(ResourceCreateKind::Create, true)
    }

    pub fn post_create(permission: ResourcePermission) -> Self {
        Self::from_parts(ResourceCreateKind::PostCreate(permission), false)
    }

    pub fn post_create_with_grant(permission: ResourcePermission) -> Self {
        Self::from_parts(ResourceCreateKind::PostCreate(permission), true)
    }

    pub fn post_create_permission(&self) -> Option<&ResourcePermission> {
        match self.kind() {
            ResourceCreateKind::PostCreate(p) => Some(p),
            ResourceCreateKind::Create => None,
        }
    }
}

impl DomainCreatePermission {
    pub fn create() -> Self {
        Self::from_parts(DomainCreateKind::Create, false)
    }

    pub fn create_with_grant() -> Self {
        Self::from_parts(DomainCreateKind::Create, true)
    }

    pub fn post_create(permission: DomainPermission) -> Self {
        Self::from_parts(DomainCreateKind::PostCreate(permission), false)
    }

    pub fn post_create_with_grant(permission: DomainPermission) -> Self {
        Self::from_parts(DomainCreateKind::PostCreate(permission), true)
    }

    pub fn post_create_permission(&self) -> Option<&DomainPermission> {
        match self.kind() {
            DomainCreateKind::PostCreate(p) => Some(p),
            DomainCreateKind::Create => None,
        }
    }
}
