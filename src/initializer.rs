use sqlx::SqlitePool;

use crate::credentials::{self, PasswordCredentials};
use crate::errors::AccessResult;
use crate::models::permission::{DomainCreatePermission, DomainPermission, SystemPermission};
use crate::models::resource::{
    SYSTEM_DOMAIN, SYSTEM_DOMAIN_ID, SYSTEM_RESOURCE_CLASS, SYSTEM_RESOURCE_CLASS_ID, SYSTEM_RESOURCE_ID,
};
use crate::store::{domain_grants, identity};

/// Seed the system domain, the system resource class and the system resource
/// with `credentials` as its password.
///
/// The system resource becomes super-user of the system domain and may create
/// domains. Returns `false` without touching anything when the database was
/// already initialized.
pub async fn initialize(pool: &SqlitePool, credentials: &PasswordCredentials) -> AccessResult<bool> {
    credentials::validate_password(credentials, 1)?;

    let mut tx = pool.begin().await?;
    if identity::domain_exists(&mut tx, SYSTEM_DOMAIN_ID).await? {
        tracing::warn!("access control store already initialized; skipping bootstrap");
        return Ok(false);
    }

    identity::insert_domain(&mut tx, Some(SYSTEM_DOMAIN_ID), SYSTEM_DOMAIN, None).await?;
    identity::insert_resource_class(&mut tx, Some(SYSTEM_RESOURCE_CLASS_ID), SYSTEM_RESOURCE_CLASS, true, false)
        .await?;
    identity::insert_resource_with_id(&mut tx, SYSTEM_RESOURCE_ID, SYSTEM_RESOURCE_CLASS_ID, SYSTEM_DOMAIN_ID).await?;

    let hash = credentials::hash_password(SYSTEM_RESOURCE_ID, credentials)?;
    identity::set_password_hash(&mut tx, SYSTEM_RESOURCE_ID, &hash).await?;

    domain_grants::insert_domain_grant(
        &mut tx,
        SYSTEM_RESOURCE_ID,
        SYSTEM_RESOURCE_ID,
        SYSTEM_DOMAIN_ID,
        &DomainPermission::new_with_grant(SystemPermission::SuperUser),
    )
    .await?;

    let domain_create = [
        DomainCreatePermission::create_with_grant(),
        DomainCreatePermission::post_create_with_grant(DomainPermission::new_with_grant(SystemPermission::SuperUser)),
        DomainCreatePermission::post_create_with_grant(DomainPermission::new_with_grant(
            SystemPermission::CreateChildDomain,
        )),
    ];
    for permission in &domain_create {
        domain_grants::insert_domain_create_grant(&mut tx, SYSTEM_RESOURCE_ID, SYSTEM_RESOURCE_ID, permission).await?;
    }
    tx.commit().await?;

    tracing::info!(
        domain = SYSTEM_DOMAIN,
        resource_class = SYSTEM_RESOURCE_CLASS,
        "access control store initialized"
    );
    Ok(true)
}
