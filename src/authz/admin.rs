use super::context::{required_name, AccessControlContext};
use super::resolver;
use crate::credentials::{self, PasswordCredentials};
use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{DomainCreateKind, DomainPermission, PermissionName, ResourceCreateKind, SystemPermission};
use crate::models::resource::{normalize_name, Resource, ResourceId};
use crate::store::grants::{grants_for, GrantTarget};
use crate::store::{domain_grants, identity};

impl AccessControlContext {
    /// Register a resource class. Only the system resource may do this.
    pub async fn create_resource_class(
        &self,
        resource_class: &str,
        authenticatable: bool,
        unauthenticated_create_allowed: bool,
    ) -> AccessResult<()> {
        self.require_system_session("create resource classes")?;
        let name = required_name(resource_class, "resource class")?;

        let mut tx = self.begin().await?;
        if identity::find_resource_class(&mut tx, &name).await?.is_some() {
            return Err(AccessError::invalid_argument(format!("duplicate resource class: {name}")));
        }
        let id = identity::insert_resource_class(&mut tx, None, &name, authenticatable, unauthenticated_create_allowed)
            .await?;
        tx.commit().await?;

        tracing::info!(resource_class = %name, id, authenticatable, "resource class created");
        Ok(())
    }

    /// Define custom permission `permission` for `resource_class`. Only the
    /// system resource may do this.
    pub async fn create_resource_permission(&self, resource_class: &str, permission: &str) -> AccessResult<()> {
        self.require_system_session("create resource permissions")?;
        let class_name = required_name(resource_class, "resource class")?;
        let permission_name = required_name(permission, "permission name")?;
        if permission_name.starts_with('*') {
            return Err(AccessError::invalid_argument(format!(
                "permission name may not start with an asterisk: {permission_name}"
            )));
        }

        let mut tx = self.begin().await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let existing = identity::custom_permissions(&mut tx, class.id).await?;
        if existing.contains_key(&permission_name) {
            return Err(AccessError::invalid_argument(format!(
                "duplicate permission: {permission_name} for resource class: {class_name}"
            )));
        }
        identity::insert_custom_permission(&mut tx, class.id, &permission_name).await?;
        tx.commit().await?;

        tracing::info!(resource_class = %class_name, permission = %permission_name, "resource permission created");
        Ok(())
    }

    /// Create a root domain. Requires domain-create `*CREATE`.
    pub async fn create_domain(&self, domain: &str) -> AccessResult<()> {
        self.create_domain_under(domain, None).await
    }

    /// Create `domain` below `parent`. Also requires `*CREATE-CHILD-DOMAIN`
    /// on the parent.
    pub async fn create_child_domain(&self, domain: &str, parent: &str) -> AccessResult<()> {
        self.create_domain_under(domain, Some(parent)).await
    }

    async fn create_domain_under(&self, domain: &str, parent: Option<&str>) -> AccessResult<()> {
        let session = self.session_id()?;
        let name = required_name(domain, "domain")?;
        let parent_name = parent.map(|parent| required_name(parent, "parent domain")).transpose()?;

        let mut tx = self.begin().await?;
        if identity::find_domain(&mut tx, &name).await?.is_some() {
            return Err(AccessError::invalid_argument(format!("duplicate domain: {name}")));
        }
        let parent = match &parent_name {
            Some(parent_name) => Some(identity::require_domain(&mut tx, parent_name).await?),
            None => None,
        };

        let create_permissions = resolver::effective_domain_create_permissions(&mut tx, session).await?;
        if !create_permissions.iter().any(|p| matches!(p.kind(), DomainCreateKind::Create)) {
            return Err(AccessError::not_authorized(format!(
                "resource {session} is not authorized to create domains"
            )));
        }
        if let Some(parent) = parent {
            let on_parent = resolver::effective_domain_permissions(&mut tx, session, parent).await?;
            if !DomainPermission::new(SystemPermission::CreateChildDomain).is_satisfied_by(&on_parent) {
                return Err(AccessError::not_authorized(format!(
                    "resource {session} is not authorized to create child domains of {}",
                    parent_name.as_deref().unwrap_or_default()
                )));
            }
        }

        let id = identity::insert_domain(&mut tx, None, &name, parent).await?;
        for permission in resolver::post_create_domain_permissions(&create_permissions) {
            domain_grants::insert_domain_grant(&mut tx, session, session, id, &permission).await?;
        }
        tx.commit().await?;

        tracing::info!(domain = %name, id, parent = ?parent, creator = session, "domain created");
        Ok(())
    }

    /// Create a resource of `resource_class` in `domain`.
    ///
    /// An authenticated caller needs effective resource-create `*CREATE` and
    /// receives the post-create permissions it was granted on the new
    /// resource; super-user alone yields none. Without a session only classes
    /// that allow unauthenticated creation are accepted. `credentials` may only
    /// be given for authenticatable classes.
    pub async fn create_resource(
        &self,
        resource_class: &str,
        domain: &str,
        external_id: Option<&str>,
        credentials: Option<&PasswordCredentials>,
    ) -> AccessResult<Resource> {
        let session = if self.session().is_authenticated() {
            Some(self.session_id()?)
        } else {
            None
        };
        let class_name = required_name(resource_class, "resource class")?;
        let domain_name = required_name(domain, "domain")?;
        let external_id = match external_id {
            Some(external_id) => Some(
                normalize_name(external_id)
                    .ok_or_else(|| AccessError::invalid_argument("external id may not be blank"))?,
            ),
            None => None,
        };

        let mut tx = self.begin().await?;
        let class = identity::require_resource_class(&mut tx, &class_name).await?;
        let domain = identity::require_domain(&mut tx, &domain_name).await?;

        if let Some(credentials) = credentials {
            if !class.authenticatable {
                return Err(AccessError::invalid_argument(format!(
                    "credentials not valid for unauthenticatable resource class: {class_name}"
                )));
            }
            credentials::validate_password(credentials, self.min_password_length())?;
        }
        if let Some(external_id) = &external_id {
            if identity::external_id_exists(&mut tx, external_id).await? {
                return Err(AccessError::invalid_argument(format!(
                    "external id is not unique: {external_id}"
                )));
            }
        }

        let post_create = match session {
            Some(session) => {
                let create_permissions =
                    resolver::effective_resource_create_permissions(&mut tx, session, &class, domain).await?;
                if !create_permissions.iter().any(|p| matches!(p.kind(), ResourceCreateKind::Create)) {
                    return Err(AccessError::not_authorized(format!(
                        "resource {session} is not authorized to create {class_name} resources in domain {domain_name}"
                    )));
                }
                let granted = resolver::inherited_resource_create_permissions(&mut tx, session, &class, domain).await?;
                resolver::post_create_resource_permissions(&granted)
            }
            None if class.unauthenticated_create_allowed => Vec::new(),
            None => {
                return Err(AccessError::not_authenticated(format!(
                    "session not authenticated: anonymous creation of {class_name} resources is not permitted"
                )));
            }
        };

        let id: ResourceId = identity::insert_resource(&mut tx, class.id, domain).await?;
        if let Some(external_id) = &external_id {
            identity::insert_external_id(&mut tx, id, external_id).await?;
        }
        if let Some(credentials) = credentials {
            let hash = credentials::hash_password(id, credentials)?;
            identity::set_password_hash(&mut tx, id, &hash).await?;
        }

        if let Some(creator) = session {
            let custom = identity::custom_permissions(&mut tx, class.id).await?;
            let target = GrantTarget::Resource {
                resource_id: id,
                resource_class_id: class.id,
            };
            for permission in &post_create {
                let permission_id = match permission.name() {
                    PermissionName::System(system) => system.id(),
                    PermissionName::Custom(name) => match custom.get(name) {
                        Some(id) => *id,
                        None => continue,
                    },
                };
                grants_for(permission.name())
                    .insert(&mut tx, creator, creator, target, permission_id, permission.is_with_grant())
                    .await?;
            }
        }
        tx.commit().await?;

        tracing::info!(
            resource = id,
            resource_class = %class_name,
            domain = %domain_name,
            creator = ?session,
            post_create = post_create.len(),
            "resource created"
        );
        Ok(Resource::resolved(id, external_id))
    }
}
