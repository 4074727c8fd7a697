//! Operations that change grants. The session resource must hold every
//! permission it adds, changes or removes, with grant option.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use sqlx::SqliteConnection;

use super::context::{describe, required_name, AccessControlContext};
use super::{hierarchy, resolver, validation};
use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{
    DomainCreateKind, DomainCreatePermission, DomainPermission, Permission, PermissionName, ResourceCreateKind,
    ResourceCreatePermission, ResourcePermission, SystemPermission,
};
use crate::models::resource::{DomainId, ResolvedResource, Resource, ResourceClassRow, ResourceId};
use crate::store::grants::{grants_for, GrantTarget};
use crate::store::{create_grants, domain_grants, identity};

/// Difference between the grants an accessor holds directly and a request.
#[derive(Debug)]
struct GrantPlan<K> {
    add: Vec<Permission<K>>,
    update: Vec<Permission<K>>,
    remove: Vec<Permission<K>>,
}

impl<K: Eq + Hash + Clone> GrantPlan<K> {
    fn current_by_kind(current: &HashSet<Permission<K>>) -> HashMap<&K, &Permission<K>> {
        current.iter().map(|p| (p.kind(), p)).collect()
    }

    /// Make the direct grants exactly `requested`.
    fn replacing(current: &HashSet<Permission<K>>, requested: &[Permission<K>]) -> Self {
        let mut plan = Self::adding_or_changing(current, requested, true);
        let requested_kinds: HashSet<&K> = requested.iter().map(|p| p.kind()).collect();
        plan.remove = current
            .iter()
            .filter(|p| !requested_kinds.contains(p.kind()))
            .cloned()
            .collect();
        plan
    }

    /// Add missing grants. An existing grant is only ever upgraded to carry
    /// the grant option, never downgraded.
    fn adding(current: &HashSet<Permission<K>>, requested: &[Permission<K>]) -> Self {
        Self::adding_or_changing(current, requested, false)
    }

    fn adding_or_changing(current: &HashSet<Permission<K>>, requested: &[Permission<K>], downgrade: bool) -> Self {
        let current = Self::current_by_kind(current);
        let mut plan = GrantPlan {
            add: Vec::new(),
            update: Vec::new(),
            remove: Vec::new(),
        };
        for permission in requested {
            match current.get(permission.kind()) {
                None => plan.add.push(permission.clone()),
                Some(held) if held.is_with_grant() == permission.is_with_grant() => {}
                Some(_) if permission.is_with_grant() || downgrade => plan.update.push(permission.clone()),
                Some(_) => {}
            }
        }
        plan
    }

    /// Remove whatever grants of the requested permissions exist, regardless
    /// of their grant option.
    fn removing(current: &HashSet<Permission<K>>, requested: &[Permission<K>]) -> Self {
        let current = Self::current_by_kind(current);
        GrantPlan {
            add: Vec::new(),
            update: Vec::new(),
            remove: requested
                .iter()
                .filter_map(|p| current.get(p.kind()).map(|held| (*held).clone()))
                .collect(),
        }
    }

    fn changed(&self) -> impl Iterator<Item = &Permission<K>> {
        self.add.iter().chain(&self.update).chain(&self.remove)
    }

    fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Permissions in `plan` the grantor cannot hand out.
fn ungrantable<K: Eq + Hash + Clone>(
    plan: &GrantPlan<K>,
    grantor_holds: impl Fn(&Permission<K>) -> bool,
) -> Vec<Permission<K>> {
    plan.changed().filter(|p| !grantor_holds(p)).cloned().collect()
}

fn not_authorized_to_grant<T: std::fmt::Display>(grantor: ResourceId, denied: &[T], target: &str) -> AccessError {
    AccessError::not_authorized(format!(
        "resource {grantor} is not authorized to grant or revoke permission(s) {} on {target}",
        describe(denied)
    ))
}

/// Can a holder of `held` grant or revoke create permission `requested`? The
/// holder needs it with grant option; a post-create entry's inner grant option
/// must also be at least as strong as the one requested.
fn can_grant_resource_create(requested: &ResourceCreatePermission, held: &HashSet<ResourceCreatePermission>) -> bool {
    Permission::from_parts(requested.kind().clone(), true).is_satisfied_by(held)
}

fn can_grant_domain_create(requested: &DomainCreatePermission, held: &HashSet<DomainCreatePermission>) -> bool {
    Permission::from_parts(requested.kind().clone(), true).is_satisfied_by(held)
}

/// Where resource permission grants are being written, with what the grantor
/// effectively holds there.
struct ResourceGrantContext {
    target: GrantTarget,
    class: ResourceClassRow,
    custom: HashMap<String, i64>,
    grantor_holds: HashSet<ResourcePermission>,
    description: String,
}

impl ResourceGrantContext {
    fn permission_id(&self, permission: &ResourcePermission) -> AccessResult<i64> {
        validation::resolve_resource_permission(&self.class, &self.custom, permission)
    }
}

async fn apply_resource_plan(
    conn: &mut SqliteConnection,
    grantor: ResourceId,
    accessor: ResourceId,
    context: &ResourceGrantContext,
    plan: &GrantPlan<PermissionName>,
) -> AccessResult<()> {
    let denied = ungrantable(plan, |p| {
        ResourcePermission::from_parts(p.name().clone(), true).is_satisfied_by(&context.grantor_holds)
    });
    if !denied.is_empty() {
        return Err(not_authorized_to_grant(grantor, &denied, &context.description));
    }

    for permission in &plan.remove {
        let id = context.permission_id(permission)?;
        grants_for(permission.name()).delete(conn, accessor, context.target, id).await?;
    }
    for permission in &plan.update {
        let id = context.permission_id(permission)?;
        grants_for(permission.name())
            .update(conn, accessor, grantor, context.target, id, permission.is_with_grant())
            .await?;
    }
    for permission in &plan.add {
        let id = context.permission_id(permission)?;
        grants_for(permission.name())
            .insert(conn, accessor, grantor, context.target, id, permission.is_with_grant())
            .await?;
    }

    tracing::info!(
        grantor,
        accessor,
        target = %context.description,
        added = plan.add.len(),
        updated = plan.update.len(),
        removed = plan.remove.len(),
        "resource permissions changed"
    );
    Ok(())
}

/// INHERIT may not close a loop in the inheritance graph.
async fn reject_inherit_cycle(
    conn: &mut SqliteConnection,
    accessor: &ResolvedResource,
    accessed: &ResolvedResource,
    plan: &GrantPlan<PermissionName>,
) -> AccessResult<()> {
    let inherit = PermissionName::System(SystemPermission::Inherit);
    if plan.add.iter().any(|p| p.name() == &inherit) && hierarchy::inherit_would_cycle(conn, accessor.id, accessed.id).await? {
        return Err(AccessError::invalid_argument(format!(
            "granting {inherit} on {} to {} would create a cycle",
            accessed.to_resource(),
            accessor.to_resource()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Replace,
    Grant,
    Revoke,
}

impl Mode {
    fn plan<K: Eq + Hash + Clone>(self, current: &HashSet<Permission<K>>, requested: &[Permission<K>]) -> GrantPlan<K> {
        match self {
            Mode::Replace => GrantPlan::replacing(current, requested),
            Mode::Grant => GrantPlan::adding(current, requested),
            Mode::Revoke => GrantPlan::removing(current, requested),
        }
    }
}

impl AccessControlContext {
    // --- Resource permissions ---

    /// Make `permissions` the exact set of direct grants `accessor` holds on
    /// `accessed`. An empty slice revokes everything.
    pub async fn set_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        self.change_resource_permissions(accessor, accessed, permissions, Mode::Replace)
            .await
    }

    /// Add `permissions` to the direct grants of `accessor` on `accessed`.
    pub async fn grant_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_resource_permissions(accessor, accessed, permissions, Mode::Grant)
            .await
    }

    pub async fn revoke_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_resource_permissions(accessor, accessed, permissions, Mode::Revoke)
            .await
    }

    async fn change_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
        mode: Mode,
    ) -> AccessResult<()> {
        let grantor = self.session_id()?;
        validation::reject_conflicting(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let accessed = identity::resolve_resource(&mut tx, accessed).await?;
        let class = identity::resource_class_by_id(&mut tx, accessed.resource_class_id).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        validation::resolve_resource_permissions(&class, &custom, permissions)?;

        let current = resolver::direct_resource_permissions(&mut tx, accessor.id, accessed.id).await?;
        let plan = mode.plan(&current, permissions);
        reject_inherit_cycle(&mut tx, &accessor, &accessed, &plan).await?;
        if plan.is_empty() {
            return Ok(());
        }

        let context = ResourceGrantContext {
            target: GrantTarget::Resource {
                resource_id: accessed.id,
                resource_class_id: class.id,
            },
            grantor_holds: resolver::effective_resource_permissions(&mut tx, grantor, &accessed).await?,
            description: format!("resource {}", accessed.to_resource()),
            class,
            custom,
        };
        apply_resource_plan(&mut tx, grantor, accessor.id, &context, &plan).await?;
        tx.commit().await?;
        Ok(())
    }

    // --- Global resource permissions ---

    /// Make `permissions` the exact set of global grants `accessor` holds on
    /// `resource_class` in `domain` (and so in every domain below it).
    pub async fn set_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        self.change_global_resource_permissions(accessor, resource_class, domain, permissions, Mode::Replace)
            .await
    }

    pub async fn grant_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_global_resource_permissions(accessor, resource_class, domain, permissions, Mode::Grant)
            .await
    }

    pub async fn revoke_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_global_resource_permissions(accessor, resource_class, domain, permissions, Mode::Revoke)
            .await
    }

    async fn change_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
        mode: Mode,
    ) -> AccessResult<()> {
        let grantor = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_conflicting(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        validation::resolve_resource_permissions(&class, &custom, permissions)?;

        let current = resolver::direct_global_permissions(&mut tx, accessor.id, &class, domain).await?;
        let plan = mode.plan(&current, permissions);
        if plan.is_empty() {
            return Ok(());
        }

        let context = ResourceGrantContext {
            target: GrantTarget::Global {
                resource_class_id: class.id,
                domain_id: domain,
            },
            grantor_holds: resolver::effective_global_permissions(&mut tx, grantor, &class, domain).await?,
            description: format!("resource class {class_name} in domain {domain_name}"),
            class,
            custom,
        };
        apply_resource_plan(&mut tx, grantor, accessor.id, &context, &plan).await?;
        tx.commit().await?;
        Ok(())
    }

    // --- Domain permissions ---

    pub async fn set_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<()> {
        self.change_domain_permissions(accessor, domain, permissions, Mode::Replace)
            .await
    }

    pub async fn grant_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_domain_permissions(accessor, domain, permissions, Mode::Grant)
            .await
    }

    pub async fn revoke_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<()> {
        validation::require_permissions(permissions)?;
        self.change_domain_permissions(accessor, domain, permissions, Mode::Revoke)
            .await
    }

    async fn change_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
        mode: Mode,
    ) -> AccessResult<()> {
        let grantor = self.session_id()?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_conflicting(permissions)?;
        validation::validate_domain_permissions(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;

        let current = resolver::direct_domain_permissions(&mut tx, accessor.id, domain).await?;
        let plan = mode.plan(&current, permissions);
        if plan.is_empty() {
            return Ok(());
        }

        let grantor_holds = resolver::effective_domain_permissions(&mut tx, grantor, domain).await?;
        let denied = ungrantable(&plan, |p| {
            DomainPermission::new_with_grant(p.permission()).is_satisfied_by(&grantor_holds)
        });
        if !denied.is_empty() {
            return Err(not_authorized_to_grant(grantor, &denied, &format!("domain {domain_name}")));
        }

        apply_domain_plan(&mut tx, grantor, accessor.id, domain, &plan).await?;
        tx.commit().await?;

        tracing::info!(grantor, accessor = accessor.id, domain = %domain_name, "domain permissions changed");
        Ok(())
    }

    // --- Resource-create permissions ---

    /// Replace the resource-create grants `accessor` holds for
    /// `resource_class` in `domain`. A non-empty set must include `*CREATE`.
    pub async fn set_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourceCreatePermission],
    ) -> AccessResult<()> {
        let grantor = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_conflicting(permissions)?;
        validation::reject_conflicting_post_create(permissions)?;
        validation::require_create(permissions, |kind| matches!(kind, ResourceCreateKind::Create))?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        let custom_ids = validation::resolve_resource_create_permissions(&class, &custom, permissions)?;

        let current = resolver::direct_resource_create_permissions(&mut tx, accessor.id, &class, domain).await?;
        let plan = GrantPlan::replacing(&current, permissions);
        if plan.is_empty() {
            return Ok(());
        }

        let grantor_holds = resolver::effective_resource_create_permissions(&mut tx, grantor, &class, domain).await?;
        let denied = ungrantable(&plan, |p| can_grant_resource_create(p, &grantor_holds));
        if !denied.is_empty() {
            return Err(not_authorized_to_grant(
                grantor,
                &denied,
                &format!("resource class {class_name} in domain {domain_name}"),
            ));
        }

        create_grants::delete_resource_create_grants(&mut tx, accessor.id, class.id, domain).await?;
        for (permission, custom_id) in permissions.iter().zip(custom_ids) {
            create_grants::insert_resource_create_grant(
                &mut tx,
                accessor.id,
                grantor,
                class.id,
                domain,
                permission,
                custom_id,
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            grantor,
            accessor = accessor.id,
            class = %class_name,
            domain = %domain_name,
            permissions = permissions.len(),
            "resource create permissions set"
        );
        Ok(())
    }

    // --- Domain-create permissions ---

    /// Replace the domain-create grants of `accessor`. A non-empty set must
    /// include `*CREATE`.
    pub async fn set_domain_create_permissions(
        &self,
        accessor: &Resource,
        permissions: &[DomainCreatePermission],
    ) -> AccessResult<()> {
        let grantor = self.session_id()?;
        validation::reject_conflicting(permissions)?;
        validation::reject_conflicting_domain_post_create(permissions)?;
        validation::require_create(permissions, |kind| matches!(kind, DomainCreateKind::Create))?;
        validation::validate_domain_create_permissions(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;

        let current = resolver::direct_domain_create_permissions(&mut tx, accessor.id).await?;
        let plan = GrantPlan::replacing(&current, permissions);
        if plan.is_empty() {
            return Ok(());
        }

        let grantor_holds = resolver::effective_domain_create_permissions(&mut tx, grantor).await?;
        let denied = ungrantable(&plan, |p| can_grant_domain_create(p, &grantor_holds));
        if !denied.is_empty() {
            return Err(not_authorized_to_grant(grantor, &denied, "domain creation"));
        }

        domain_grants::delete_domain_create_grants(&mut tx, accessor.id).await?;
        for permission in permissions {
            domain_grants::insert_domain_create_grant(&mut tx, accessor.id, grantor, permission).await?;
        }
        tx.commit().await?;

        tracing::info!(grantor, accessor = accessor.id, permissions = permissions.len(), "domain create permissions set");
        Ok(())
    }
}

async fn apply_domain_plan(
    conn: &mut SqliteConnection,
    grantor: ResourceId,
    accessor: ResourceId,
    domain: DomainId,
    plan: &GrantPlan<SystemPermission>,
) -> AccessResult<()> {
    for permission in &plan.remove {
        domain_grants::delete_domain_grant(conn, accessor, domain, permission.permission()).await?;
    }
    for permission in &plan.update {
        domain_grants::update_domain_grant(conn, accessor, grantor, domain, permission).await?;
    }
    for permission in &plan.add {
        domain_grants::insert_domain_grant(conn, accessor, grantor, domain, permission).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(permissions: &[ResourcePermission]) -> HashSet<ResourcePermission> {
        permissions.iter().cloned().collect()
    }

    #[test]
    fn replacing_adds_changes_and_removes() {
        let current = held(&[ResourcePermission::new("view"), ResourcePermission::new("edit")]);
        let requested = [ResourcePermission::new_with_grant("edit"), ResourcePermission::new("share")];

        let plan = GrantPlan::replacing(&current, &requested);
        assert_eq!(plan.add, vec![ResourcePermission::new("share")]);
        assert_eq!(plan.update, vec![ResourcePermission::new_with_grant("edit")]);
        assert_eq!(plan.remove, vec![ResourcePermission::new("view")]);
    }

    #[test]
    fn granting_never_downgrades() {
        let current = held(&[ResourcePermission::new_with_grant("edit")]);

        let plan = GrantPlan::adding(&current, &[ResourcePermission::new("edit")]);
        assert!(plan.is_empty());

        let current = held(&[ResourcePermission::new("edit")]);
        let plan = GrantPlan::adding(&current, &[ResourcePermission::new_with_grant("edit")]);
        assert_eq!(plan.update.len(), 1);
    }

    #[test]
    fn revoking_ignores_grant_option_and_missing_grants() {
        let current = held(&[ResourcePermission::new_with_grant("edit")]);
        let plan = GrantPlan::removing(&current, &[ResourcePermission::new("edit"), ResourcePermission::new("view")]);
        assert_eq!(plan.remove, vec![ResourcePermission::new_with_grant("edit")]);
    }

    #[test]
    fn post_create_grant_option_must_be_covered() {
        let held: HashSet<ResourceCreatePermission> = [
            ResourceCreatePermission::create_with_grant(),
            ResourceCreatePermission::post_create_with_grant(ResourcePermission::new("edit")),
        ]
        .into_iter()
        .collect();

        assert!(can_grant_resource_create(&ResourceCreatePermission::create(), &held));
        assert!(can_grant_resource_create(
            &ResourceCreatePermission::post_create(ResourcePermission::new("edit")),
            &held
        ));
        assert!(!can_grant_resource_create(
            &ResourceCreatePermission::post_create(ResourcePermission::new_with_grant("edit")),
            &held
        ));
    }
}
