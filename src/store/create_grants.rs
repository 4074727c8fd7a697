//! Resource-create permissions: the right to create resources of a class in a
//! domain (`Grant_ResCrPerm_Sys`) and the permissions a creator receives on
//! what it creates (`Grant_ResCrPerm_PostCr_Sys`, `Grant_ResCrPerm_PostCr`).

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db::row_parsers::{bool_column, grant_from_row, system_permission_column, text_column, GrantRow};
use crate::db::sql::push_in_list;
use crate::errors::{AccessError, AccessResult};
use crate::models::permission::{
    PermissionName, ResourceCreateKind, ResourceCreatePermission, ResourcePermission, SystemPermission,
};
use crate::models::resource::{DomainId, ResourceClassId, ResourceId};

fn push_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    accessors: &[ResourceId],
    resource_class_id: ResourceClassId,
    domain_ids: &[DomainId],
) {
    builder.push("g.ResourceClassId = ");
    builder.push_bind(resource_class_id);
    builder.push(" AND ");
    push_in_list(builder, "g.AccessedDomainId", domain_ids.iter().copied());
    builder.push(" AND ");
    push_in_list(builder, "g.AccessorResourceId", accessors.iter().copied());
}

/// Resource-create grants held by any of `accessors` for `resource_class_id`
/// in any of `domain_ids`. `GrantRow::scope_id` is the domain.
pub async fn find_resource_create_grants(
    conn: &mut SqliteConnection,
    accessors: &[ResourceId],
    resource_class_id: ResourceClassId,
    domain_ids: &[DomainId],
) -> AccessResult<Vec<GrantRow<ResourceCreateKind>>> {
    let mut grants = Vec::new();

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT g.AccessorResourceId AS AccessorResourceId, g.AccessedDomainId AS AccessedDomainId, \
         g.SysPermissionId AS SysPermissionId, g.IsWithGrant AS IsWithGrant \
         FROM Grant_ResCrPerm_Sys g WHERE ",
    );
    push_filter(&mut builder, accessors, resource_class_id, domain_ids);
    for row in builder.build().fetch_all(&mut *conn).await? {
        grants.push(grant_from_row(&row, "AccessedDomainId", |row| {
            system_permission_column(row, "SysPermissionId").map(|_| ResourceCreateKind::Create)
        })?);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT g.AccessorResourceId AS AccessorResourceId, g.AccessedDomainId AS AccessedDomainId, \
         g.PostCreateSysPermissionId AS PostCreateSysPermissionId, \
         g.PostCreateIsWithGrant AS PostCreateIsWithGrant, g.IsWithGrant AS IsWithGrant \
         FROM Grant_ResCrPerm_PostCr_Sys g WHERE ",
    );
    push_filter(&mut builder, accessors, resource_class_id, domain_ids);
    for row in builder.build().fetch_all(&mut *conn).await? {
        grants.push(grant_from_row(&row, "AccessedDomainId", |row| {
            let name = PermissionName::System(system_permission_column(row, "PostCreateSysPermissionId")?);
            let post_create = ResourcePermission::from_parts(name, bool_column(row, "PostCreateIsWithGrant")?);
            Ok(ResourceCreateKind::PostCreate(post_create))
        })?);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT g.AccessorResourceId AS AccessorResourceId, g.AccessedDomainId AS AccessedDomainId, \
         p.PermissionName AS PermissionName, \
         g.PostCreateIsWithGrant AS PostCreateIsWithGrant, g.IsWithGrant AS IsWithGrant \
         FROM Grant_ResCrPerm_PostCr g \
         JOIN ResourceClassPermission p ON p.PermissionId = g.PostCreatePermissionId WHERE ",
    );
    push_filter(&mut builder, accessors, resource_class_id, domain_ids);
    for row in builder.build().fetch_all(&mut *conn).await? {
        grants.push(grant_from_row(&row, "AccessedDomainId", |row| {
            let name = PermissionName::Custom(text_column(row, "PermissionName")?);
            let post_create = ResourcePermission::from_parts(name, bool_column(row, "PostCreateIsWithGrant")?);
            Ok(ResourceCreateKind::PostCreate(post_create))
        })?);
    }

    Ok(grants)
}

pub async fn delete_resource_create_grants(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    resource_class_id: ResourceClassId,
    domain_id: DomainId,
) -> AccessResult<()> {
    for table in ["Grant_ResCrPerm_Sys", "Grant_ResCrPerm_PostCr_Sys", "Grant_ResCrPerm_PostCr"] {
        let sql = format!(
            "DELETE FROM {table} WHERE AccessorResourceId = ? AND ResourceClassId = ? AND AccessedDomainId = ?"
        );
        sqlx::query(&sql)
            .bind(accessor)
            .bind(resource_class_id)
            .bind(domain_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Store one resource-create grant. `custom_permission_id` must be set for
/// post-create grants of custom permissions.
pub async fn insert_resource_create_grant(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    grantor: ResourceId,
    resource_class_id: ResourceClassId,
    domain_id: DomainId,
    permission: &ResourceCreatePermission,
    custom_permission_id: Option<i64>,
) -> AccessResult<()> {
    let post_create = match permission.kind() {
        ResourceCreateKind::Create => {
            sqlx::query(
                "INSERT INTO Grant_ResCrPerm_Sys \
                 (AccessorResourceId, GrantorResourceId, AccessedDomainId, ResourceClassId, SysPermissionId, IsWithGrant) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(accessor)
            .bind(grantor)
            .bind(domain_id)
            .bind(resource_class_id)
            .bind(SystemPermission::Create.id())
            .bind(permission.is_with_grant())
            .execute(&mut *conn)
            .await?;
            return Ok(());
        }
        ResourceCreateKind::PostCreate(post_create) => post_create,
    };

    let (table, column, permission_id) = match (post_create.name(), custom_permission_id) {
        (PermissionName::System(system), _) => ("Grant_ResCrPerm_PostCr_Sys", "PostCreateSysPermissionId", system.id()),
        (PermissionName::Custom(_), Some(id)) => ("Grant_ResCrPerm_PostCr", "PostCreatePermissionId", id),
        (PermissionName::Custom(name), None) => {
            return Err(AccessError::internal(format!(
                "custom permission {name} was not resolved before insert"
            )));
        }
    };

    let sql = format!(
        "INSERT INTO {table} \
         (AccessorResourceId, GrantorResourceId, AccessedDomainId, ResourceClassId, {column}, PostCreateIsWithGrant, IsWithGrant) \
         VALUES (?, ?, ?, ?, ?, ?, ?)"
    );
    sqlx::query(&sql)
        .bind(accessor)
        .bind(grantor)
        .bind(domain_id)
        .bind(resource_class_id)
        .bind(permission_id)
        .bind(post_create.is_with_grant())
        .bind(permission.is_with_grant())
        .execute(&mut *conn)
        .await?;
    Ok(())
}
