//! Permission checks and permission queries.
//!
//! Every operation validates in the same order: session, references,
//! permission validity, the query gate, then evaluation.

use std::collections::{BTreeMap, HashSet};

use super::context::{authorize_query, describe, joined, required_name, AccessControlContext};
use super::{hierarchy, resolver, validation};
use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{
    DomainCreatePermission, DomainPermission, Permission, PermissionKind, ResourceCreatePermission,
    ResourcePermission,
};
use crate::models::resource::{Resource, ResourceClassInfo};
use crate::store::identity;

fn holds_all<K: PermissionKind>(requested: &[Permission<K>], effective: &HashSet<Permission<K>>) -> bool {
    requested.iter().all(|permission| permission.is_satisfied_by(effective))
}

impl AccessControlContext {
    // --- Resource permissions ---

    /// Does `accessor` hold every one of `permissions` on `accessed`?
    pub async fn has_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<bool> {
        validation::require_permissions(permissions)?;
        self.check_resource_permissions(accessor, accessed, permissions).await
    }

    pub async fn has_resource_permission(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permission: &ResourcePermission,
        additional: &[ResourcePermission],
    ) -> AccessResult<bool> {
        self.check_resource_permissions(accessor, accessed, &joined(permission, additional))
            .await
    }

    pub async fn assert_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        if !self.has_resource_permissions(accessor, accessed, permissions).await? {
            return Err(AccessError::not_authorized(format!(
                "resource {accessor} does not have permission(s) {} on resource {accessed}",
                describe(permissions)
            )));
        }
        Ok(())
    }

    pub async fn assert_resource_permission(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permission: &ResourcePermission,
        additional: &[ResourcePermission],
    ) -> AccessResult<()> {
        self.assert_resource_permissions(accessor, accessed, &joined(permission, additional))
            .await
    }

    async fn check_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
        permissions: &[ResourcePermission],
    ) -> AccessResult<bool> {
        let session = self.session_id()?;
        validation::reject_duplicates(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let accessed = identity::resolve_resource(&mut tx, accessed).await?;
        let class = identity::resource_class_by_id(&mut tx, accessed.resource_class_id).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        validation::resolve_resource_permissions(&class, &custom, permissions)?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_resource_permissions(&mut tx, accessor.id, &accessed).await?;
        tx.commit().await?;

        let granted = holds_all(permissions, &effective);
        tracing::debug!(accessor = accessor.id, accessed = accessed.id, granted, "resource permission check");
        Ok(granted)
    }

    pub async fn get_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
    ) -> AccessResult<HashSet<ResourcePermission>> {
        let session = self.session_id()?;
        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let accessed = identity::resolve_resource(&mut tx, accessed).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let direct = resolver::direct_resource_permissions(&mut tx, accessor.id, accessed.id).await?;
        tx.commit().await?;
        Ok(direct)
    }

    pub async fn get_effective_resource_permissions(
        &self,
        accessor: &Resource,
        accessed: &Resource,
    ) -> AccessResult<HashSet<ResourcePermission>> {
        let session = self.session_id()?;
        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let accessed = identity::resolve_resource(&mut tx, accessed).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_resource_permissions(&mut tx, accessor.id, &accessed).await?;
        tx.commit().await?;
        Ok(effective)
    }

    // --- Global resource permissions ---

    /// Does `accessor` hold every one of `permissions` on all resources of
    /// `resource_class` in `domain`?
    pub async fn has_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<bool> {
        validation::require_permissions(permissions)?;
        self.check_global_resource_permissions(accessor, resource_class, domain, permissions)
            .await
    }

    pub async fn has_global_resource_permission(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permission: &ResourcePermission,
        additional: &[ResourcePermission],
    ) -> AccessResult<bool> {
        self.check_global_resource_permissions(accessor, resource_class, domain, &joined(permission, additional))
            .await
    }

    pub async fn assert_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<()> {
        if !self
            .has_global_resource_permissions(accessor, resource_class, domain, permissions)
            .await?
        {
            return Err(AccessError::not_authorized(format!(
                "resource {accessor} does not have global permission(s) {} on resource class {} in domain {}",
                describe(permissions),
                resource_class.trim(),
                domain.trim()
            )));
        }
        Ok(())
    }

    async fn check_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<bool> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_duplicates(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        validation::resolve_resource_permissions(&class, &custom, permissions)?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_global_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;

        let granted = holds_all(permissions, &effective);
        tracing::debug!(accessor = accessor.id, class = %class.name, domain, granted, "global permission check");
        Ok(granted)
    }

    pub async fn get_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
    ) -> AccessResult<HashSet<ResourcePermission>> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let direct = resolver::direct_global_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;
        Ok(direct)
    }

    pub async fn get_effective_global_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
    ) -> AccessResult<HashSet<ResourcePermission>> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_global_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;
        Ok(effective)
    }

    // --- Resource-create permissions ---

    pub async fn has_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourceCreatePermission],
    ) -> AccessResult<bool> {
        validation::require_permissions(permissions)?;
        self.check_resource_create_permissions(accessor, resource_class, domain, permissions)
            .await
    }

    pub async fn has_resource_create_permission(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permission: &ResourceCreatePermission,
        additional: &[ResourceCreatePermission],
    ) -> AccessResult<bool> {
        self.check_resource_create_permissions(accessor, resource_class, domain, &joined(permission, additional))
            .await
    }

    pub async fn assert_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourceCreatePermission],
    ) -> AccessResult<()> {
        if !self
            .has_resource_create_permissions(accessor, resource_class, domain, permissions)
            .await?
        {
            return Err(AccessError::not_authorized(format!(
                "resource {accessor} does not have create permission(s) {} for resource class {} in domain {}",
                describe(permissions),
                resource_class.trim(),
                domain.trim()
            )));
        }
        Ok(())
    }

    async fn check_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourceCreatePermission],
    ) -> AccessResult<bool> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_duplicates(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        validation::resolve_resource_create_permissions(&class, &custom, permissions)?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_resource_create_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;
        Ok(holds_all(permissions, &effective))
    }

    pub async fn get_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
    ) -> AccessResult<HashSet<ResourceCreatePermission>> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let direct = resolver::direct_resource_create_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;
        Ok(direct)
    }

    pub async fn get_effective_resource_create_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
    ) -> AccessResult<HashSet<ResourceCreatePermission>> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_resource_create_permissions(&mut tx, accessor.id, &class, domain).await?;
        tx.commit().await?;
        Ok(effective)
    }

    // --- Domain permissions ---

    pub async fn has_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<bool> {
        validation::require_permissions(permissions)?;
        self.check_domain_permissions(accessor, domain, permissions).await
    }

    pub async fn has_domain_permission(
        &self,
        accessor: &Resource,
        domain: &str,
        permission: &DomainPermission,
        additional: &[DomainPermission],
    ) -> AccessResult<bool> {
        self.check_domain_permissions(accessor, domain, &joined(permission, additional))
            .await
    }

    pub async fn assert_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<()> {
        if !self.has_domain_permissions(accessor, domain, permissions).await? {
            return Err(AccessError::not_authorized(format!(
                "resource {accessor} does not have domain permission(s) {} on domain {}",
                describe(permissions),
                domain.trim()
            )));
        }
        Ok(())
    }

    async fn check_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
        permissions: &[DomainPermission],
    ) -> AccessResult<bool> {
        let session = self.session_id()?;
        let domain_name = required_name(domain, "domain")?;
        validation::reject_duplicates(permissions)?;
        validation::validate_domain_permissions(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_domain_permissions(&mut tx, accessor.id, domain).await?;
        tx.commit().await?;
        Ok(holds_all(permissions, &effective))
    }

    pub async fn get_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
    ) -> AccessResult<HashSet<DomainPermission>> {
        let session = self.session_id()?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let direct = resolver::direct_domain_permissions(&mut tx, accessor.id, domain).await?;
        tx.commit().await?;
        Ok(direct)
    }

    pub async fn get_effective_domain_permissions(
        &self,
        accessor: &Resource,
        domain: &str,
    ) -> AccessResult<HashSet<DomainPermission>> {
        let session = self.session_id()?;
        let domain_name = required_name(domain, "domain")?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_domain_permissions(&mut tx, accessor.id, domain).await?;
        tx.commit().await?;
        Ok(effective)
    }

    // --- Domain-create permissions ---

    pub async fn has_domain_create_permissions(
        &self,
        accessor: &Resource,
        permissions: &[DomainCreatePermission],
    ) -> AccessResult<bool> {
        let session = self.session_id()?;
        validation::require_permissions(permissions)?;
        validation::reject_duplicates(permissions)?;
        validation::validate_domain_create_permissions(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_domain_create_permissions(&mut tx, accessor.id).await?;
        tx.commit().await?;
        Ok(holds_all(permissions, &effective))
    }

    pub async fn get_domain_create_permissions(&self, accessor: &Resource) -> AccessResult<HashSet<DomainCreatePermission>> {
        let session = self.session_id()?;
        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let direct = resolver::direct_domain_create_permissions(&mut tx, accessor.id).await?;
        tx.commit().await?;
        Ok(direct)
    }

    pub async fn get_effective_domain_create_permissions(
        &self,
        accessor: &Resource,
    ) -> AccessResult<HashSet<DomainCreatePermission>> {
        let session = self.session_id()?;
        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        authorize_query(&mut tx, session, &accessor).await?;

        let effective = resolver::effective_domain_create_permissions(&mut tx, accessor.id).await?;
        tx.commit().await?;
        Ok(effective)
    }

    // --- Enumeration ---

    /// Resources of `resource_class` on which `accessor` holds all of
    /// `permissions`, ordered by id.
    pub async fn get_resources_by_resource_permissions(
        &self,
        accessor: &Resource,
        resource_class: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<Vec<Resource>> {
        self.find_resources(accessor, resource_class, None, permissions).await
    }

    /// Like [`Self::get_resources_by_resource_permissions`], restricted to the
    /// subtree rooted at `domain`.
    pub async fn get_resources_by_resource_permissions_and_domain(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: &str,
        permissions: &[ResourcePermission],
    ) -> AccessResult<Vec<Resource>> {
        self.find_resources(accessor, resource_class, Some(domain), permissions)
            .await
    }

    async fn find_resources(
        &self,
        accessor: &Resource,
        resource_class: &str,
        domain: Option<&str>,
        permissions: &[ResourcePermission],
    ) -> AccessResult<Vec<Resource>> {
        let session = self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = domain.map(|domain| required_name(domain, "domain")).transpose()?;
        validation::require_permissions(permissions)?;
        validation::reject_duplicates(permissions)?;

        let mut tx = self.begin().await?;
        let accessor = identity::resolve_resource(&mut tx, accessor).await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = match domain_name {
            Some(name) => Some(identity::require_domain(&mut tx, &name).await?),
            None => None,
        };
        let custom = identity::custom_permissions(&mut tx, class.id).await?;
        let ids = validation::resolve_resource_permissions(&class, &custom, permissions)?;
        authorize_query(&mut tx, session, &accessor).await?;

        let requested: Vec<(ResourcePermission, i64)> = permissions.iter().cloned().zip(ids).collect();
        let found = resolver::resources_with_permissions(&mut tx, accessor.id, &class, &requested, domain).await?;
        let resources = identity::resources_by_ids(&mut tx, found).await?;
        tx.commit().await?;

        Ok(resources.iter().map(|resource| resource.to_resource()).collect())
    }

    // --- Lookups ---

    pub async fn get_domain_name_by_resource(&self, resource: &Resource) -> AccessResult<String> {
        self.session_id()?;
        let mut tx = self.begin().await?;
        let resolved = identity::resolve_resource(&mut tx, resource).await?;
        let name = identity::domain_name(&mut tx, resolved.domain_id).await?;
        tx.commit().await?;
        Ok(name)
    }

    pub async fn get_resource_class_info_by_resource(&self, resource: &Resource) -> AccessResult<ResourceClassInfo> {
        self.session_id()?;
        let mut tx = self.begin().await?;
        let resolved = identity::resolve_resource(&mut tx, resource).await?;
        let class = identity::resource_class_by_id(&mut tx, resolved.resource_class_id).await?;
        tx.commit().await?;
        Ok(class.into())
    }

    pub async fn get_resource_class_info(&self, resource_class: &str) -> AccessResult<ResourceClassInfo> {
        self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let mut tx = self.begin().await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        tx.commit().await?;
        Ok(class.into())
    }

    pub async fn get_resource_class_names(&self) -> AccessResult<Vec<String>> {
        self.session_id()?;
        let mut tx = self.begin().await?;
        let names = identity::resource_class_names(&mut tx).await?;
        tx.commit().await?;
        Ok(names)
    }

    /// Custom permission names defined for `resource_class`, sorted.
    pub async fn get_resource_permission_names(&self, resource_class: &str) -> AccessResult<Vec<String>> {
        self.session_id()?;
        let class_name = required_name(resource_class, "resource class")?;
        let mut tx = self.begin().await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let mut names: Vec<String> = identity::custom_permissions(&mut tx, class.id).await?.into_keys().collect();
        tx.commit().await?;
        names.sort();
        Ok(names)
    }

    /// `domain` and every domain below it, by name.
    pub async fn get_domain_descendants(&self, domain: &str) -> AccessResult<Vec<String>> {
        self.session_id()?;
        let domain_name = required_name(domain, "domain")?;
        let mut tx = self.begin().await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;
        let descendants = hierarchy::descendant_domains(&mut tx, domain).await?;
        let names: BTreeMap<_, _> = identity::domain_names(&mut tx, descendants.keys().copied()).await?;
        tx.commit().await?;

        let mut names: Vec<String> = names.into_values().collect();
        names.sort();
        Ok(names)
    }
}
