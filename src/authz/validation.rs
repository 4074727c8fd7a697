use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{
    DomainCreateKind, DomainCreatePermission, DomainPermission, Permission, PermissionName, PermissionScope,
    ResourceCreateKind, ResourceCreatePermission, ResourcePermission,
};
use crate::models::resource::ResourceClassRow;

pub fn require_permissions<T>(permissions: &[T]) -> AccessResult<()> {
    if permissions.is_empty() {
        return Err(AccessError::invalid_argument("permissions required"));
    }
    Ok(())
}

/// Reject identical entries. `P` and `P /G` in one request are fine.
pub fn reject_duplicates<K>(permissions: &[Permission<K>]) -> AccessResult<()>
where
    K: Eq + Hash + Display,
{
    let mut seen = HashSet::new();
    for permission in permissions {
        if !seen.insert(permission) {
            return Err(AccessError::invalid_argument(format!("duplicate element: {permission}")));
        }
    }
    Ok(())
}

/// For requests that store grants: one entry per permission, whatever its
/// grant option.
pub fn reject_conflicting<K>(permissions: &[Permission<K>]) -> AccessResult<()>
where
    K: Eq + Hash + Display,
{
    reject_duplicates(permissions)?;
    let mut seen = HashSet::new();
    for permission in permissions {
        if !seen.insert(permission.kind()) {
            return Err(AccessError::invalid_argument(format!(
                "duplicate permission: {} that only differs in grant option",
                permission.kind()
            )));
        }
    }
    Ok(())
}

/// Check `permission` against the resource class and return the id stored in
/// the grant tables (system permission id or custom `PermissionId`).
pub fn resolve_resource_permission(
    class: &ResourceClassRow,
    custom: &HashMap<String, i64>,
    permission: &ResourcePermission,
) -> AccessResult<i64> {
    match permission.name() {
        PermissionName::System(system) => {
            if !system.is_valid_for(PermissionScope::Resource) {
                return Err(AccessError::invalid_argument(format!(
                    "Permission: {system} is not a valid resource permission"
                )));
            }
            if system.requires_authenticatable() && !class.authenticatable {
                return Err(AccessError::invalid_argument(format!(
                    "Permission: {system} not valid for unauthenticatable resource class: {}",
                    class.name
                )));
            }
            Ok(system.id())
        }
        PermissionName::Custom(name) => {
            if name.is_empty() {
                return Err(AccessError::precondition("permission name required"));
            }
            if name.starts_with('*') {
                return Err(AccessError::invalid_argument(format!("invalid system permission name: {name}")));
            }
            custom.get(name).copied().ok_or_else(|| {
                AccessError::invalid_argument(format!(
                    "Permission: {name} is not defined for resource class: {}",
                    class.name
                ))
            })
        }
    }
}

pub fn resolve_resource_permissions(
    class: &ResourceClassRow,
    custom: &HashMap<String, i64>,
    permissions: &[ResourcePermission],
) -> AccessResult<Vec<i64>> {
    permissions
        .iter()
        .map(|permission| resolve_resource_permission(class, custom, permission))
        .collect()
}

pub fn validate_domain_permissions(permissions: &[DomainPermission]) -> AccessResult<()> {
    for permission in permissions {
        if !permission.permission().is_valid_for(PermissionScope::Domain) {
            return Err(AccessError::invalid_argument(format!(
                "Permission: {} is not a valid domain permission",
                permission.permission()
            )));
        }
    }
    Ok(())
}

/// Returns, per entry, the custom permission id of a post-create grant.
pub fn resolve_resource_create_permissions(
    class: &ResourceClassRow,
    custom: &HashMap<String, i64>,
    permissions: &[ResourceCreatePermission],
) -> AccessResult<Vec<Option<i64>>> {
    permissions
        .iter()
        .map(|permission| match permission.kind() {
            ResourceCreateKind::Create => Ok(None),
            ResourceCreateKind::PostCreate(post_create) => {
                let id = resolve_resource_permission(class, custom, post_create)?;
                Ok((!post_create.is_system_permission()).then_some(id))
            }
        })
        .collect()
}

pub fn validate_domain_create_permissions(permissions: &[DomainCreatePermission]) -> AccessResult<()> {
    let post_create: Vec<DomainPermission> = permissions
        .iter()
        .filter_map(|permission| match permission.kind() {
            DomainCreateKind::PostCreate(post_create) => Some(post_create.clone()),
            DomainCreateKind::Create => None,
        })
        .collect();
    validate_domain_permissions(&post_create)
}

/// One post-create entry per permission in a stored create-permission set.
pub fn reject_conflicting_post_create(permissions: &[ResourceCreatePermission]) -> AccessResult<()> {
    let mut seen = HashSet::new();
    for permission in permissions {
        if let ResourceCreateKind::PostCreate(post_create) = permission.kind() {
            if !seen.insert(post_create.name()) {
                return Err(AccessError::invalid_argument(format!(
                    "duplicate permission: {} that only differs in grant option",
                    post_create.name()
                )));
            }
        }
    }
    Ok(())
}

pub fn reject_conflicting_domain_post_create(permissions: &[DomainCreatePermission]) -> AccessResult<()> {
    let mut seen = HashSet::new();
    for permission in permissions {
        if let DomainCreateKind::PostCreate(post_create) = permission.kind() {
            if !seen.insert(post_create.permission()) {
                return Err(AccessError::invalid_argument(format!(
                    "duplicate permission: {} that only differs in grant option",
                    post_create.permission()
                )));
            }
        }
    }
    Ok(())
}

/// Create-permission sets that grant anything must include `*CREATE`.
pub fn require_create<K, F>(permissions: &[Permission<K>], is_create: F) -> AccessResult<()>
where
    F: Fn(&K) -> bool,
{
    if !permissions.is_empty() && !permissions.iter().any(|p| is_create(p.kind())) {
        return Err(AccessError::invalid_argument("Permission *CREATE must be specified"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::permission::SystemPermission;

    fn document_class() -> ResourceClassRow {
        ResourceClassRow {
            id: 3,
            name: "Document".into(),
            authenticatable: false,
            unauthenticated_create_allowed: false,
        }
    }

    #[test]
    fn grant_variants_of_one_permission_are_not_duplicates() {
        let request = [ResourcePermission::new("edit"), ResourcePermission::new_with_grant("edit")];
        assert!(reject_duplicates(&request).is_ok());
        assert!(reject_conflicting(&request).is_err());

        let err = reject_duplicates(&[ResourcePermission::new("edit"), ResourcePermission::new("edit")]).unwrap_err();
        assert!(err.to_string().contains("duplicate element"));
    }

    #[test]
    fn unknown_and_unauthenticatable_permissions_are_rejected() {
        let class = document_class();
        let custom = HashMap::from([("edit".to_string(), 11)]);

        assert_eq!(resolve_resource_permission(&class, &custom, &ResourcePermission::new("edit")).unwrap(), 11);

        let err = resolve_resource_permission(&class, &custom, &ResourcePermission::new("fly")).unwrap_err();
        assert!(err.to_string().contains("is not defined for resource class: Document"));

        let impersonate = ResourcePermission::system(SystemPermission::Impersonate);
        let err = resolve_resource_permission(&class, &custom, &impersonate).unwrap_err();
        assert!(err.to_string().contains("not valid for unauthenticatable resource class"));

        let super_user = ResourcePermission::system(SystemPermission::SuperUser);
        assert!(resolve_resource_permission(&class, &custom, &super_user).is_err());

        let err = resolve_resource_permission(&class, &custom, &ResourcePermission::new("  ")).unwrap_err();
        assert_eq!(err.kind(), "precondition");
    }

    #[test]
    fn create_sets_must_name_create() {
        let only_post = [ResourceCreatePermission::post_create(ResourcePermission::new("edit"))];
        assert!(require_create(&only_post, |k| matches!(k, ResourceCreateKind::Create)).is_err());
        assert!(require_create::<ResourceCreateKind, _>(&[], |k| matches!(k, ResourceCreateKind::Create)).is_ok());
    }

    #[test]
    fn post_create_entries_may_not_differ_only_in_grant_option() {
        let request = [
            ResourceCreatePermission::create(),
            ResourceCreatePermission::post_create(ResourcePermission::new("edit")),
            ResourceCreatePermission::post_create(ResourcePermission::new_with_grant("edit")),
        ];
        assert!(reject_conflicting(&request).is_ok());
        assert!(reject_conflicting_post_create(&request).is_err());
    }
}
