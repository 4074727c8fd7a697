//! Effective permission computation.
//!
//! An accessor's effective permissions are the union of direct grants held by
//! the accessor or anything it transitively inherits from, and global grants
//! on the target's resource class in the target's domain or any ancestor
//! domain. `*SUPER-USER` on any of those domains short-circuits to every
//! permission with grant option.

use std::collections::{BTreeSet, HashMap, HashSet};

use sqlx::SqliteConnection;

use super::hierarchy::{self, Closure};
use crate::errors::AccessResult;
use crate::models::permission::{
    DomainCreateKind, DomainCreatePermission, DomainPermission, Permission, PermissionName, ResourceCreateKind,
    ResourceCreatePermission, ResourcePermission, SystemPermission, DOMAIN_SYSTEM_PERMISSIONS,
    RESOURCE_SYSTEM_PERMISSIONS,
};
use crate::models::resource::{DomainId, ResolvedResource, ResourceClassRow, ResourceId};
use crate::store::grants::{grants_for, GrantScope, ALL_GRANTS};
use crate::store::{create_grants, domain_grants, identity};

/// Every permission valid for `class`, all with grant option.
pub async fn all_resource_permissions(
    conn: &mut SqliteConnection,
    class: &ResourceClassRow,
) -> AccessResult<HashSet<ResourcePermission>> {
    let mut all: HashSet<ResourcePermission> = RESOURCE_SYSTEM_PERMISSIONS
        .into_iter()
        .filter(|p| class.authenticatable || !p.requires_authenticatable())
        .map(ResourcePermission::system_with_grant)
        .collect();

    for name in identity::custom_permissions(conn, class.id).await?.into_keys() {
        all.insert(ResourcePermission::from_parts(PermissionName::Custom(name), true));
    }
    Ok(all)
}

fn level(closure: &Closure, id: i64) -> u32 {
    closure.get(&id).copied().unwrap_or_default()
}

/// Insert keeping the closest occurrence of each permission.
fn insert_nearest<K: Eq + std::hash::Hash>(set: &mut HashSet<Permission<K>>, permission: Permission<K>) {
    let replace = match set.get(&permission) {
        Some(existing) => {
            (permission.inherit_level(), permission.domain_level())
                < (existing.inherit_level(), existing.domain_level())
        }
        None => true,
    };
    if replace {
        set.replace(permission);
    }
}

async fn is_super_user(
    conn: &mut SqliteConnection,
    accessors: &Closure,
    domains: &Closure,
) -> AccessResult<bool> {
    domain_grants::holds_super_user(conn, &hierarchy::ids(accessors), &hierarchy::ids(domains)).await
}

/// Direct grants of `accessor` on `accessed`, nothing inherited.
pub async fn direct_resource_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    accessed: ResourceId,
) -> AccessResult<HashSet<ResourcePermission>> {
    let mut direct = HashSet::new();
    for grants in ALL_GRANTS {
        for row in grants.find(conn, &[accessor], GrantScope::Resource(accessed)).await? {
            direct.insert(ResourcePermission::from_parts(row.permission, row.with_grant));
        }
    }
    Ok(direct)
}

pub async fn effective_resource_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    accessed: &ResolvedResource,
) -> AccessResult<HashSet<ResourcePermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let domains = hierarchy::ancestor_domains(conn, accessed.domain_id).await?;

    if is_super_user(conn, &accessors, &domains).await? {
        let class = identity::resource_class_by_id(conn, accessed.resource_class_id).await?;
        tracing::debug!(accessor, accessed = accessed.id, "super-user on accessed domain");
        return all_resource_permissions(conn, &class).await;
    }

    let accessor_ids = hierarchy::ids(&accessors);
    let domain_ids = hierarchy::ids(&domains);
    let mut effective = HashSet::new();

    for grants in ALL_GRANTS {
        for row in grants.find(conn, &accessor_ids, GrantScope::Resource(accessed.id)).await? {
            let permission = ResourcePermission::from_parts(row.permission, row.with_grant)
                .with_levels(level(&accessors, row.accessor_id), 0);
            insert_nearest(&mut effective, permission);
        }

        let scope = GrantScope::Global {
            resource_class_id: accessed.resource_class_id,
            domain_ids: &domain_ids,
        };
        for row in grants.find(conn, &accessor_ids, scope).await? {
            let permission = ResourcePermission::from_parts(row.permission, row.with_grant)
                .with_levels(level(&accessors, row.accessor_id), level(&domains, row.scope_id));
            insert_nearest(&mut effective, permission);
        }
    }

    tracing::debug!(
        accessor,
        accessed = accessed.id,
        inherited = accessors.len() - 1,
        permissions = effective.len(),
        "resolved effective resource permissions"
    );
    Ok(effective)
}

/// Global grants of `accessor` itself on exactly (`class`, `domain`).
pub async fn direct_global_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    domain: DomainId,
) -> AccessResult<HashSet<ResourcePermission>> {
    let mut direct = HashSet::new();
    let domain_ids = [domain];
    for grants in ALL_GRANTS {
        let scope = GrantScope::Global {
            resource_class_id: class.id,
            domain_ids: &domain_ids,
        };
        for row in grants.find(conn, &[accessor], scope).await? {
            direct.insert(ResourcePermission::from_parts(row.permission, row.with_grant));
        }
    }
    Ok(direct)
}

pub async fn effective_global_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    domain: DomainId,
) -> AccessResult<HashSet<ResourcePermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let domains = hierarchy::ancestor_domains(conn, domain).await?;

    if is_super_user(conn, &accessors, &domains).await? {
        return all_resource_permissions(conn, class).await;
    }

    let accessor_ids = hierarchy::ids(&accessors);
    let domain_ids = hierarchy::ids(&domains);
    let mut effective = HashSet::new();
    for grants in ALL_GRANTS {
        let scope = GrantScope::Global {
            resource_class_id: class.id,
            domain_ids: &domain_ids,
        };
        for row in grants.find(conn, &accessor_ids, scope).await? {
            let permission = ResourcePermission::from_parts(row.permission, row.with_grant)
                .with_levels(level(&accessors, row.accessor_id), level(&domains, row.scope_id));
            insert_nearest(&mut effective, permission);
        }
    }
    Ok(effective)
}

pub async fn direct_domain_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    domain: DomainId,
) -> AccessResult<HashSet<DomainPermission>> {
    let rows = domain_grants::find_domain_grants(conn, &[accessor], &[domain]).await?;
    Ok(rows
        .into_iter()
        .map(|row| DomainPermission::from_parts(row.permission, row.with_grant))
        .collect())
}

/// Domain grants reach a domain from every ancestor. `*SUPER-USER` anywhere on
/// that path expands to all domain permissions with grant option.
pub async fn effective_domain_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    domain: DomainId,
) -> AccessResult<HashSet<DomainPermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let domains = hierarchy::ancestor_domains(conn, domain).await?;

    let rows =
        domain_grants::find_domain_grants(conn, &hierarchy::ids(&accessors), &hierarchy::ids(&domains)).await?;

    if rows.iter().any(|row| row.permission == SystemPermission::SuperUser) {
        return Ok(DOMAIN_SYSTEM_PERMISSIONS
            .into_iter()
            .map(DomainPermission::new_with_grant)
            .collect());
    }

    let mut effective = HashSet::new();
    for row in rows {
        let permission = DomainPermission::from_parts(row.permission, row.with_grant)
            .with_levels(level(&accessors, row.accessor_id), level(&domains, row.scope_id));
        insert_nearest(&mut effective, permission);
    }
    Ok(effective)
}

pub async fn direct_resource_create_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    domain: DomainId,
) -> AccessResult<HashSet<ResourceCreatePermission>> {
    let rows = create_grants::find_resource_create_grants(conn, &[accessor], class.id, &[domain]).await?;
    Ok(rows
        .into_iter()
        .map(|row| ResourceCreatePermission::from_parts(row.permission, row.with_grant))
        .collect())
}

/// A super-user may create anything in its domains and may hand out every
/// post-create permission of the class.
pub async fn effective_resource_create_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    domain: DomainId,
) -> AccessResult<HashSet<ResourceCreatePermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let domains = hierarchy::ancestor_domains(conn, domain).await?;

    if is_super_user(conn, &accessors, &domains).await? {
        let mut all: HashSet<ResourceCreatePermission> = all_resource_permissions(conn, class)
            .await?
            .into_iter()
            .map(ResourceCreatePermission::post_create_with_grant)
            .collect();
        all.insert(ResourceCreatePermission::create_with_grant());
        return Ok(all);
    }

    granted_resource_create_permissions(conn, &accessors, class, &domains).await
}

/// Resource-create grants reachable through inheritance and domain ancestry,
/// without the super-user expansion. This is what a creator actually
/// receives on a new resource.
pub async fn inherited_resource_create_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    domain: DomainId,
) -> AccessResult<HashSet<ResourceCreatePermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let domains = hierarchy::ancestor_domains(conn, domain).await?;
    granted_resource_create_permissions(conn, &accessors, class, &domains).await
}

async fn granted_resource_create_permissions(
    conn: &mut SqliteConnection,
    accessors: &Closure,
    class: &ResourceClassRow,
    domains: &Closure,
) -> AccessResult<HashSet<ResourceCreatePermission>> {
    let rows = create_grants::find_resource_create_grants(
        conn,
        &hierarchy::ids(accessors),
        class.id,
        &hierarchy::ids(domains),
    )
    .await?;

    let mut effective = HashSet::new();
    for row in rows {
        let permission = ResourceCreatePermission::from_parts(row.permission, row.with_grant)
            .with_levels(level(accessors, row.accessor_id), level(domains, row.scope_id));
        insert_nearest(&mut effective, permission);
    }
    Ok(effective)
}

pub async fn direct_domain_create_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
) -> AccessResult<HashSet<DomainCreatePermission>> {
    let rows = domain_grants::find_domain_create_grants(conn, &[accessor]).await?;
    Ok(rows.into_iter().map(|(_, permission)| permission).collect())
}

pub async fn effective_domain_create_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
) -> AccessResult<HashSet<DomainCreatePermission>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let rows = domain_grants::find_domain_create_grants(conn, &hierarchy::ids(&accessors)).await?;

    let mut effective = HashSet::new();
    for (holder, permission) in rows {
        insert_nearest(&mut effective, permission.with_levels(level(&accessors, holder), 0));
    }
    Ok(effective)
}

/// Ids of resources of `class` on which `accessor` holds every requested
/// permission, optionally limited to the subtree rooted at `within`.
///
/// A resource qualifies for one permission through a direct (or inherited)
/// grant on it, a global grant on an ancestor of its domain, or super-user on
/// an ancestor of its domain. `requested` pairs each permission with its
/// stored id.
pub async fn resources_with_permissions(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    class: &ResourceClassRow,
    requested: &[(ResourcePermission, i64)],
    within: Option<DomainId>,
) -> AccessResult<BTreeSet<ResourceId>> {
    let accessors = hierarchy::inherited_accessors(conn, accessor).await?;
    let accessor_ids = hierarchy::ids(&accessors);

    let super_user_roots =
        domain_grants::domains_with_permission(conn, &accessor_ids, SystemPermission::SuperUser).await?;
    let super_user_domains = hierarchy::descendant_domains_of(conn, &super_user_roots).await?;

    let mut qualifying: Option<BTreeSet<ResourceId>> = None;
    for (permission, permission_id) in requested {
        let grants = grants_for(permission.name());
        let with_grant = permission.is_with_grant();

        let mut matching: BTreeSet<ResourceId> = grants
            .find_accessed(conn, &accessor_ids, class.id, *permission_id, with_grant)
            .await?
            .into_iter()
            .collect();

        let global_roots = grants
            .find_global_domains(conn, &accessor_ids, class.id, *permission_id, with_grant)
            .await?;
        let mut domains = hierarchy::descendant_domains_of(conn, &global_roots).await?;
        domains.extend(super_user_domains.iter().map(|(id, level)| (*id, *level)));
        matching.extend(identity::resources_in_domains(conn, class.id, domains.keys().copied()).await?);

        qualifying = Some(match qualifying {
            None => matching,
            Some(previous) => previous.intersection(&matching).copied().collect(),
        });
    }

    let mut qualifying = qualifying.unwrap_or_default();
    if let Some(root) = within {
        let subtree = hierarchy::descendant_domains(conn, root).await?;
        let allowed: HashSet<ResourceId> = identity::resources_in_domains(conn, class.id, subtree.keys().copied())
            .await?
            .into_iter()
            .collect();
        qualifying.retain(|id| allowed.contains(id));
    }

    tracing::debug!(accessor, class = %class.name, found = qualifying.len(), "enumerated resources");
    Ok(qualifying)
}

/// Collapse post-create grants into the permissions a creator receives: one
/// entry per permission, with grant option if any grant carries it.
pub fn post_create_resource_permissions(
    create_permissions: &HashSet<ResourceCreatePermission>,
) -> Vec<ResourcePermission> {
    let mut merged: HashMap<PermissionName, bool> = HashMap::new();
    for permission in create_permissions {
        if let ResourceCreateKind::PostCreate(post_create) = permission.kind() {
            let entry = merged.entry(post_create.name().clone()).or_default();
            *entry |= post_create.is_with_grant();
        }
    }
    let mut permissions: Vec<ResourcePermission> = merged
        .into_iter()
        .map(|(name, with_grant)| ResourcePermission::from_parts(name, with_grant))
        .collect();
    permissions.sort_by(|a, b| a.name().cmp(b.name()));
    permissions
}

pub fn post_create_domain_permissions(create_permissions: &HashSet<DomainCreatePermission>) -> Vec<DomainPermission> {
    let mut merged = HashMap::new();
    for permission in create_permissions {
        if let DomainCreateKind::PostCreate(post_create) = permission.kind() {
            let entry = merged.entry(post_create.permission()).or_insert(false);
            *entry |= post_create.is_with_grant();
        }
    }
    let mut permissions: Vec<DomainPermission> = merged
        .into_iter()
        .map(|(permission, with_grant)| DomainPermission::from_parts(permission, with_grant))
        .collect();
    permissions.sort_by_key(|p| p.permission());
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_create_grants_merge_toward_grant_option() {
        let create = HashSet::from([
            ResourceCreatePermission::create(),
            ResourceCreatePermission::post_create(ResourcePermission::new("edit")),
            ResourceCreatePermission::post_create_with_grant(ResourcePermission::new_with_grant("edit")),
            ResourceCreatePermission::post_create(ResourcePermission::system(SystemPermission::Query)),
        ]);

        let received = post_create_resource_permissions(&create);
        assert_eq!(received.len(), 2);
        assert!(received.contains(&ResourcePermission::new_with_grant("edit")));
        assert!(received.contains(&ResourcePermission::system(SystemPermission::Query)));
    }

    #[test]
    fn nearest_grant_wins_diagnostics() {
        let mut set = HashSet::new();
        insert_nearest(&mut set, ResourcePermission::new("edit").with_levels(3, 1));
        insert_nearest(&mut set, ResourcePermission::new("edit").with_levels(1, 0));
        insert_nearest(&mut set, ResourcePermission::new("edit").with_levels(2, 0));

        let held = set.iter().next().unwrap();
        assert_eq!((held.inherit_level(), held.domain_level()), (1, 0));
    }
}
