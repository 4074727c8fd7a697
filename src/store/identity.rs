//! Lookups and inserts for the entity tables: domains, resource classes,
//! custom permission names, resources, external ids and password hashes.

use std::collections::{BTreeMap, HashMap};

use sqlx::{QueryBuilder, SqliteConnection};

use crate::db::row_parsers::{id_column, resolved_resource_from_row, resource_class_from_row, text_column};
use crate::db::sql::push_in_list;
use crate::errors::{AccessError, AccessResult};
use crate::models::resource::{DomainId, Resource, ResolvedResource, ResourceClassId, ResourceClassRow, ResourceId};

const RESOURCE_SELECT: &str = "SELECT r.ResourceId, e.ExternalId, r.ResourceClassId, r.DomainId \
     FROM Resource r LEFT JOIN ResourceExternalId e ON e.ResourceId = r.ResourceId";

/// Resolve a caller-supplied reference to the stored resource.
///
/// When both ids are given they must name the same resource. External ids are
/// trimmed, as they are when a resource is created.
pub async fn resolve_resource(conn: &mut SqliteConnection, resource: &Resource) -> AccessResult<ResolvedResource> {
    let external_id = resource.external_id().map(str::trim);
    let row = match (resource.id(), external_id) {
        (None, None) => {
            return Err(AccessError::invalid_argument("resource id and/or external id is required"));
        }
        (Some(id), _) => {
            let sql = format!("{RESOURCE_SELECT} WHERE r.ResourceId = ?");
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        }
        (None, Some(external_id)) => {
            let sql = format!("{RESOURCE_SELECT} WHERE e.ExternalId = ?");
            sqlx::query(&sql)
                .bind(external_id)
                .fetch_optional(&mut *conn)
                .await?
        }
    };

    let resolved = match row {
        Some(row) => resolved_resource_from_row(&row)?,
        None => return Err(AccessError::invalid_argument(format!("{resource} not found"))),
    };

    if let Some(external_id) = external_id {
        if resolved.external_id.as_deref() != Some(external_id) {
            return Err(AccessError::invalid_argument(format!(
                "{resource} does not resolve to a valid resource"
            )));
        }
    }

    Ok(resolved)
}

pub async fn resources_by_ids(
    conn: &mut SqliteConnection,
    ids: impl IntoIterator<Item = ResourceId>,
) -> AccessResult<Vec<ResolvedResource>> {
    let mut builder = QueryBuilder::new(RESOURCE_SELECT);
    builder.push(" WHERE ");
    push_in_list(&mut builder, "r.ResourceId", ids);
    builder.push(" ORDER BY r.ResourceId");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(resolved_resource_from_row).collect()
}

/// Resources of `resource_class_id` placed in any of `domain_ids`.
pub async fn resources_in_domains(
    conn: &mut SqliteConnection,
    resource_class_id: ResourceClassId,
    domain_ids: impl IntoIterator<Item = DomainId>,
) -> AccessResult<Vec<ResourceId>> {
    let mut builder = QueryBuilder::new("SELECT ResourceId FROM Resource WHERE ResourceClassId = ");
    builder.push_bind(resource_class_id);
    builder.push(" AND ");
    push_in_list(&mut builder, "DomainId", domain_ids);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(|row| id_column(row, "ResourceId")).collect()
}

pub async fn external_id_exists(conn: &mut SqliteConnection, external_id: &str) -> AccessResult<bool> {
    let row = sqlx::query("SELECT ResourceId FROM ResourceExternalId WHERE ExternalId = ?")
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub async fn insert_resource(
    conn: &mut SqliteConnection,
    resource_class_id: ResourceClassId,
    domain_id: DomainId,
) -> AccessResult<ResourceId> {
    let result = sqlx::query("INSERT INTO Resource (ResourceClassId, DomainId) VALUES (?, ?)")
        .bind(resource_class_id)
        .bind(domain_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a resource under a caller-chosen id. Only the bootstrap uses this.
pub async fn insert_resource_with_id(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
    resource_class_id: ResourceClassId,
    domain_id: DomainId,
) -> AccessResult<()> {
    sqlx::query("INSERT INTO Resource (ResourceId, ResourceClassId, DomainId) VALUES (?, ?, ?)")
        .bind(resource_id)
        .bind(resource_class_id)
        .bind(domain_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_external_id(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
    external_id: &str,
) -> AccessResult<()> {
    sqlx::query("INSERT INTO ResourceExternalId (ResourceId, ExternalId) VALUES (?, ?)")
        .bind(resource_id)
        .bind(external_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn password_hash(conn: &mut SqliteConnection, resource_id: ResourceId) -> AccessResult<Option<String>> {
    let row = sqlx::query("SELECT Password FROM ResourcePassword WHERE ResourceId = ?")
        .bind(resource_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| text_column(&row, "Password")).transpose()
}

pub async fn set_password_hash(
    conn: &mut SqliteConnection,
    resource_id: ResourceId,
    password_hash: &str,
) -> AccessResult<()> {
    sqlx::query(
        "INSERT INTO ResourcePassword (ResourceId, Password) VALUES (?, ?) \
         ON CONFLICT (ResourceId) DO UPDATE SET Password = excluded.Password",
    )
    .bind(resource_id)
    .bind(password_hash)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// --- Resource classes ---

pub async fn find_resource_class(conn: &mut SqliteConnection, name: &str) -> AccessResult<Option<ResourceClassRow>> {
    let row = sqlx::query(
        "SELECT ResourceClassId, ResourceClassName, IsAuthenticatable, IsUnauthenticatedCreateAllowed \
         FROM ResourceClass WHERE ResourceClassName = ?",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(resource_class_from_row).transpose()
}

/// Like [`find_resource_class`], failing when the class does not exist.
pub async fn require_resource_class(conn: &mut SqliteConnection, name: &str) -> AccessResult<ResourceClassRow> {
    find_resource_class(conn, name)
        .await?
        .ok_or_else(|| AccessError::invalid_argument(format!("could not find resource class: {name}")))
}

pub async fn resource_class_by_id(conn: &mut SqliteConnection, id: ResourceClassId) -> AccessResult<ResourceClassRow> {
    let row = sqlx::query(
        "SELECT ResourceClassId, ResourceClassName, IsAuthenticatable, IsUnauthenticatedCreateAllowed \
         FROM ResourceClass WHERE ResourceClassId = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => resource_class_from_row(&row),
        None => Err(AccessError::internal(format!("dangling resource class id: {id}"))),
    }
}

pub async fn resource_class_names(conn: &mut SqliteConnection) -> AccessResult<Vec<String>> {
    let rows = sqlx::query("SELECT ResourceClassName FROM ResourceClass ORDER BY ResourceClassName")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|row| text_column(row, "ResourceClassName")).collect()
}

pub async fn insert_resource_class(
    conn: &mut SqliteConnection,
    id: Option<ResourceClassId>,
    name: &str,
    authenticatable: bool,
    unauthenticated_create_allowed: bool,
) -> AccessResult<ResourceClassId> {
    let result = sqlx::query(
        "INSERT INTO ResourceClass \
         (ResourceClassId, ResourceClassName, IsAuthenticatable, IsUnauthenticatedCreateAllowed) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(authenticatable)
    .bind(unauthenticated_create_allowed)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Custom permission name → `PermissionId` for one resource class.
pub async fn custom_permissions(
    conn: &mut SqliteConnection,
    resource_class_id: ResourceClassId,
) -> AccessResult<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT PermissionId, PermissionName FROM ResourceClassPermission WHERE ResourceClassId = ?")
        .bind(resource_class_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| Ok((text_column(row, "PermissionName")?, id_column(row, "PermissionId")?)))
        .collect()
}

pub async fn insert_custom_permission(
    conn: &mut SqliteConnection,
    resource_class_id: ResourceClassId,
    name: &str,
) -> AccessResult<i64> {
    let result = sqlx::query("INSERT INTO ResourceClassPermission (ResourceClassId, PermissionName) VALUES (?, ?)")
        .bind(resource_class_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

// --- Domains ---

pub async fn find_domain(conn: &mut SqliteConnection, name: &str) -> AccessResult<Option<DomainId>> {
    let row = sqlx::query("SELECT DomainId FROM Domain WHERE DomainName = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|row| id_column(&row, "DomainId")).transpose()
}

pub async fn require_domain(conn: &mut SqliteConnection, name: &str) -> AccessResult<DomainId> {
    find_domain(conn, name)
        .await?
        .ok_or_else(|| AccessError::invalid_argument(format!("could not find domain: {name}")))
}

pub async fn domain_exists(conn: &mut SqliteConnection, id: DomainId) -> AccessResult<bool> {
    let row = sqlx::query("SELECT DomainId FROM Domain WHERE DomainId = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub async fn domain_name(conn: &mut SqliteConnection, id: DomainId) -> AccessResult<String> {
    let row = sqlx::query("SELECT DomainName FROM Domain WHERE DomainId = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => text_column(&row, "DomainName"),
        None => Err(AccessError::internal(format!("dangling domain id: {id}"))),
    }
}

pub async fn domain_names(
    conn: &mut SqliteConnection,
    ids: impl IntoIterator<Item = DomainId>,
) -> AccessResult<BTreeMap<DomainId, String>> {
    let mut builder = QueryBuilder::new("SELECT DomainId, DomainName FROM Domain WHERE ");
    push_in_list(&mut builder, "DomainId", ids);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| Ok((id_column(row, "DomainId")?, text_column(row, "DomainName")?)))
        .collect()
}

pub async fn insert_domain(
    conn: &mut SqliteConnection,
    id: Option<DomainId>,
    name: &str,
    parent: Option<DomainId>,
) -> AccessResult<DomainId> {
    let result = sqlx::query("INSERT INTO Domain (DomainId, DomainName, ParentDomainId) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(parent)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}
