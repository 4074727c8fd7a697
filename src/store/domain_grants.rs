//! Domain permissions (`Grant_DomPerm_Sys`) and domain-create permissions
//! (`Grant_DomCrPerm_Sys`, `Grant_DomCrPerm_PostCr_Sys`).

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db::row_parsers::{bool_column, grant_from_row, id_column, system_permission_column, GrantRow};
use crate::db::sql::push_in_list;
use crate::errors::AccessResult;
use crate::models::permission::{DomainCreateKind, DomainCreatePermission, DomainPermission, SystemPermission};
use crate::models::resource::{DomainId, ResourceId};

/// Domain grants held by any of `accessors` on any of `domain_ids`.
pub async fn find_domain_grants(
    conn: &mut SqliteConnection,
    accessors: &[ResourceId],
    domain_ids: &[DomainId],
) -> AccessResult<Vec<GrantRow<SystemPermission>>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT AccessorResourceId, AccessedDomainId, SysPermissionId, IsWithGrant FROM Grant_DomPerm_Sys WHERE ",
    );
    push_in_list(&mut builder, "AccessedDomainId", domain_ids.iter().copied());
    builder.push(" AND ");
    push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| grant_from_row(row, "AccessedDomainId", |row| system_permission_column(row, "SysPermissionId")))
        .collect()
}

/// Does any of `accessors` hold `*SUPER-USER` on any of `domain_ids`?
pub async fn holds_super_user(
    conn: &mut SqliteConnection,
    accessors: &[ResourceId],
    domain_ids: &[DomainId],
) -> AccessResult<bool> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT 1 AS Held FROM Grant_DomPerm_Sys WHERE SysPermissionId = ");
    builder.push_bind(SystemPermission::SuperUser.id());
    builder.push(" AND ");
    push_in_list(&mut builder, "AccessedDomainId", domain_ids.iter().copied());
    builder.push(" AND ");
    push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());
    builder.push(" LIMIT 1");

    let row = builder.build().fetch_optional(&mut *conn).await?;
    Ok(row.is_some())
}

/// Domains on which any of `accessors` holds `permission` directly.
pub async fn domains_with_permission(
    conn: &mut SqliteConnection,
    accessors: &[ResourceId],
    permission: SystemPermission,
) -> AccessResult<Vec<DomainId>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT DISTINCT AccessedDomainId FROM Grant_DomPerm_Sys WHERE SysPermissionId = ");
    builder.push_bind(permission.id());
    builder.push(" AND ");
    push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(|row| id_column(row, "AccessedDomainId")).collect()
}

pub async fn insert_domain_grant(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    grantor: ResourceId,
    domain_id: DomainId,
    permission: &DomainPermission,
) -> AccessResult<()> {
    sqlx::query(
        "INSERT INTO Grant_DomPerm_Sys \
         (AccessorResourceId, GrantorResourceId, AccessedDomainId, SysPermissionId, IsWithGrant) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(accessor)
    .bind(grantor)
    .bind(domain_id)
    .bind(permission.permission().id())
    .bind(permission.is_with_grant())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_domain_grant(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    grantor: ResourceId,
    domain_id: DomainId,
    permission: &DomainPermission,
) -> AccessResult<()> {
    sqlx::query(
        "UPDATE Grant_DomPerm_Sys SET GrantorResourceId = ?, IsWithGrant = ? \
         WHERE AccessorResourceId = ? AND AccessedDomainId = ? AND SysPermissionId = ?",
    )
    .bind(grantor)
    .bind(permission.is_with_grant())
    .bind(accessor)
    .bind(domain_id)
    .bind(permission.permission().id())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_domain_grant(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    domain_id: DomainId,
    permission: SystemPermission,
) -> AccessResult<()> {
    sqlx::query(
        "DELETE FROM Grant_DomPerm_Sys WHERE AccessorResourceId = ? AND AccessedDomainId = ? AND SysPermissionId = ?",
    )
    .bind(accessor)
    .bind(domain_id)
    .bind(permission.id())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// --- Domain-create permissions ---

/// Domain-create grants held by any of `accessors`, paired with the holder.
pub async fn find_domain_create_grants(
    conn: &mut SqliteConnection,
    accessors: &[ResourceId],
) -> AccessResult<Vec<(ResourceId, DomainCreatePermission)>> {
    let mut grants = Vec::new();

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT AccessorResourceId, SysPermissionId, IsWithGrant FROM Grant_DomCrPerm_Sys WHERE ");
    push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());
    for row in builder.build().fetch_all(&mut *conn).await? {
        // only *CREATE is ever stored here
        system_permission_column(&row, "SysPermissionId")?;
        grants.push((
            id_column(&row, "AccessorResourceId")?,
            DomainCreatePermission::from_parts(DomainCreateKind::Create, bool_column(&row, "IsWithGrant")?),
        ));
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT AccessorResourceId, PostCreateSysPermissionId, PostCreateIsWithGrant, IsWithGrant \
         FROM Grant_DomCrPerm_PostCr_Sys WHERE ",
    );
    push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());
    for row in builder.build().fetch_all(&mut *conn).await? {
        let post_create = DomainPermission::from_parts(
            system_permission_column(&row, "PostCreateSysPermissionId")?,
            bool_column(&row, "PostCreateIsWithGrant")?,
        );
        grants.push((
            id_column(&row, "AccessorResourceId")?,
            DomainCreatePermission::from_parts(
                DomainCreateKind::PostCreate(post_create),
                bool_column(&row, "IsWithGrant")?,
            ),
        ));
    }

    Ok(grants)
}

pub async fn delete_domain_create_grants(conn: &mut SqliteConnection, accessor: ResourceId) -> AccessResult<()> {
    sqlx::query("DELETE FROM Grant_DomCrPerm_Sys WHERE AccessorResourceId = ?")
        .bind(accessor)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM Grant_DomCrPerm_PostCr_Sys WHERE AccessorResourceId = ?")
        .bind(accessor)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_domain_create_grant(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    grantor: ResourceId,
    permission: &DomainCreatePermission,
) -> AccessResult<()> {
    match permission.kind() {
        DomainCreateKind::Create => {
            sqlx::query(
                "INSERT INTO Grant_DomCrPerm_Sys (AccessorResourceId, GrantorResourceId, SysPermissionId, IsWithGrant) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(accessor)
            .bind(grantor)
            .bind(SystemPermission::Create.id())
            .bind(permission.is_with_grant())
            .execute(&mut *conn)
            .await?;
        }
        DomainCreateKind::PostCreate(post_create) => {
            sqlx::query(
                "INSERT INTO Grant_DomCrPerm_PostCr_Sys \
                 (AccessorResourceId, GrantorResourceId, PostCreateSysPermissionId, PostCreateIsWithGrant, IsWithGrant) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(accessor)
            .bind(grantor)
            .bind(post_create.permission().id())
            .bind(post_create.is_with_grant())
            .bind(permission.is_with_grant())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}
