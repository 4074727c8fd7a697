use std::fmt::Display;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use super::resolver;
use super::session::SessionState;
use crate::config::EngineConfig;
use crate::credentials::{self, PasswordCredentials};
use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{PermissionName, SystemPermission};
use crate::models::resource::{normalize_name, ResolvedResource, Resource, ResourceId, SYSTEM_RESOURCE_ID};
use crate::store::identity;

/// Entry point of the engine: a connection pool plus the identity of the
/// caller.
///
/// Every operation runs in its own transaction and is evaluated against the
/// grants visible to that transaction; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct AccessControlContext {
    pool: SqlitePool,
    session: SessionState,
    min_password_length: usize,
}

impl AccessControlContext {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            session: SessionState::Unauthenticated,
            min_password_length: 1,
        }
    }

    pub fn with_config(pool: SqlitePool, config: &EngineConfig) -> Self {
        Self {
            min_password_length: config.min_password_length,
            ..Self::new(pool)
        }
    }

    /// Open the pool described by `config`, apply migrations and return an
    /// unauthenticated context.
    pub async fn connect(config: &EngineConfig) -> AccessResult<Self> {
        let pool = crate::db::init(config).await?;
        Ok(Self::with_config(pool, config))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    // --- Session ---

    pub async fn authenticate(&mut self, resource: &Resource, credentials: &PasswordCredentials) -> AccessResult<()> {
        let mut tx = self.begin().await?;
        let resolved = identity::resolve_resource(&mut tx, resource).await?;
        let class = identity::resource_class_by_id(&mut tx, resolved.resource_class_id).await?;
        if !class.authenticatable {
            return Err(AccessError::invalid_argument(format!(
                "resource {resource} is not of an authenticatable resource class: {}",
                class.name
            )));
        }

        let stored = identity::password_hash(&mut tx, resolved.id).await?;
        tx.commit().await?;

        let verified = match stored {
            Some(hash) => credentials::verify_password(resolved.id, credentials, &hash)?,
            None => false,
        };
        if !verified {
            tracing::warn!(resource = resolved.id, "authentication failed");
            return Err(AccessError::not_authenticated(format!("invalid password for resource {resource}")));
        }

        tracing::info!(resource = resolved.id, "authenticated");
        self.session = SessionState::authenticated(resolved.to_resource());
        Ok(())
    }

    pub fn unauthenticate(&mut self) {
        self.session = SessionState::Unauthenticated;
    }

    /// Act as `resource`. The authenticated resource (not the current session
    /// resource) must hold `*IMPERSONATE` on it.
    pub async fn impersonate(&mut self, resource: &Resource) -> AccessResult<()> {
        let authenticated = self
            .session
            .authenticated_resource()?
            .id()
            .ok_or_else(|| AccessError::internal("authenticated resource without id"))?;

        let mut tx = self.begin().await?;
        let target = identity::resolve_resource(&mut tx, resource).await?;
        let class = identity::resource_class_by_id(&mut tx, target.resource_class_id).await?;
        if !class.authenticatable {
            return Err(AccessError::invalid_argument(format!(
                "resource {resource} is not of an authenticatable resource class: {}",
                class.name
            )));
        }

        if target.id != authenticated {
            let effective = resolver::effective_resource_permissions(&mut tx, authenticated, &target).await?;
            let impersonate = PermissionName::System(SystemPermission::Impersonate);
            if !effective.iter().any(|p| p.name() == &impersonate) {
                return Err(AccessError::not_authorized(format!(
                    "resource {authenticated} is not authorized to impersonate {resource}"
                )));
            }
        }
        tx.commit().await?;

        tracing::info!(authenticated, impersonated = target.id, "impersonating");
        self.session = self.session.impersonating(target.to_resource())?;
        Ok(())
    }

    pub fn unimpersonate(&mut self) {
        self.session = self.session.unimpersonated();
    }

    /// The resource the session currently acts as, fully resolved.
    pub fn get_session_resource(&self) -> AccessResult<Resource> {
        self.session.session_resource().cloned()
    }

    pub fn get_authenticated_resource(&self) -> AccessResult<Resource> {
        self.session.authenticated_resource().cloned()
    }

    /// Replace the password of an authenticatable resource. Allowed for the
    /// resource itself and for holders of `*RESET-CREDENTIALS` on it.
    pub async fn set_credentials(&self, resource: &Resource, credentials: &PasswordCredentials) -> AccessResult<()> {
        let session = self.session_id()?;
        credentials::validate_password(credentials, self.min_password_length)?;

        let mut tx = self.begin().await?;
        let target = identity::resolve_resource(&mut tx, resource).await?;
        let class = identity::resource_class_by_id(&mut tx, target.resource_class_id).await?;
        if !class.authenticatable {
            return Err(AccessError::invalid_argument(format!(
                "credentials not valid for unauthenticatable resource class: {}",
                class.name
            )));
        }

        if target.id != session {
            let effective = resolver::effective_resource_permissions(&mut tx, session, &target).await?;
            let reset = PermissionName::System(SystemPermission::ResetCredentials);
            if !effective.iter().any(|p| p.name() == &reset) {
                return Err(AccessError::not_authorized(format!(
                    "resource {session} is not authorized to reset credentials of {resource}"
                )));
            }
        }

        let hash = credentials::hash_password(target.id, credentials)?;
        identity::set_password_hash(&mut tx, target.id, &hash).await?;
        tx.commit().await?;

        tracing::info!(resource = target.id, grantor = session, "credentials reset");
        Ok(())
    }

    // --- Shared helpers ---

    pub(super) fn session_id(&self) -> AccessResult<ResourceId> {
        self.session.session_id()
    }

    pub(super) fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    pub(super) fn require_system_session(&self, action: &str) -> AccessResult<ResourceId> {
        let session = self.session_id()?;
        if session != SYSTEM_RESOURCE_ID {
            return Err(AccessError::not_authorized(format!(
                "resource {session} is not authorized to {action}"
            )));
        }
        Ok(session)
    }

    pub(super) async fn begin(&self) -> AccessResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }
}

/// Trimmed, non-blank name or a precondition failure naming `what`.
pub(super) fn required_name(name: &str, what: &str) -> AccessResult<String> {
    normalize_name(name).ok_or_else(|| AccessError::precondition(format!("{what} required")))
}

/// Checking another resource's permissions needs `*QUERY` or `*IMPERSONATE`
/// on it. Super-user covers both.
pub(super) async fn authorize_query(
    conn: &mut SqliteConnection,
    session: ResourceId,
    accessor: &ResolvedResource,
) -> AccessResult<()> {
    if session == accessor.id {
        return Ok(());
    }

    let effective = resolver::effective_resource_permissions(conn, session, accessor).await?;
    let allowed = effective.iter().any(|p| {
        matches!(
            p.name().as_system(),
            Some(SystemPermission::Query) | Some(SystemPermission::Impersonate)
        )
    });
    if !allowed {
        return Err(AccessError::not_authorized(format!(
            "resource {session} is not authorized to query resource {}",
            accessor.to_resource()
        )));
    }
    Ok(())
}

pub(super) fn describe<T: Display>(items: &[T]) -> String {
    let rendered: Vec<String> = items.iter().map(|item| item.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

pub(super) fn joined<T: Clone>(first: &T, rest: &[T]) -> Vec<T> {
    let mut all = Vec::with_capacity(rest.len() + 1);
    all.push(first.clone());
    all.extend_from_slice(rest);
    all
}
