use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::AccessError;
use crate::models::permission::SystemPermission;
use crate::models::resource::{ResolvedResource, ResourceClassRow};

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AccessError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AccessError::internal(format!("missing {}: {}", name, e)))
}

pub fn system_permission(id: i64) -> Result<SystemPermission, AccessError> {
    SystemPermission::from_id(id)
        .ok_or_else(|| AccessError::internal(format!("unknown system permission id: {}", id)))
}

pub fn resource_class_from_row(row: &SqliteRow) -> Result<ResourceClassRow, AccessError> {
    Ok(ResourceClassRow {
        id: column(row, "ResourceClassId")?,
        name: column(row, "ResourceClassName")?,
        authenticatable: column(row, "IsAuthenticatable")?,
        unauthenticated_create_allowed: column(row, "IsUnauthenticatedCreateAllowed")?,
    })
}

pub fn resolved_resource_from_row(row: &SqliteRow) -> Result<ResolvedResource, AccessError> {
    Ok(ResolvedResource {
        id: column(row, "ResourceId")?,
        external_id: column(row, "ExternalId")?,
        resource_class_id: column(row, "ResourceClassId")?,
        domain_id: column(row, "DomainId")?,
    })
}

/// One row of a grant table, with the permission column left to the caller.
#[derive(Debug, Clone)]
pub struct GrantRow<P> {
    pub accessor_id: i64,
    pub scope_id: i64,
    pub permission: P,
    pub with_grant: bool,
}

/// Reads `AccessorResourceId`, the given scope column (accessed resource or
/// domain) and `IsWithGrant`; `permission` decodes the permission column.
pub fn grant_from_row<P>(
    row: &SqliteRow,
    scope_column: &str,
    permission: impl FnOnce(&SqliteRow) -> Result<P, AccessError>,
) -> Result<GrantRow<P>, AccessError> {
    Ok(GrantRow {
        accessor_id: column(row, "AccessorResourceId")?,
        scope_id: column(row, scope_column)?,
        permission: permission(row)?,
        with_grant: column(row, "IsWithGrant")?,
    })
}

pub fn system_permission_column(row: &SqliteRow, name: &str) -> Result<SystemPermission, AccessError> {
    system_permission(column(row, name)?)
}

pub fn text_column(row: &SqliteRow, name: &str) -> Result<String, AccessError> {
    column(row, name)
}

pub fn bool_column(row: &SqliteRow, name: &str) -> Result<bool, AccessError> {
    column(row, name)
}

pub fn id_column(row: &SqliteRow, name: &str) -> Result<i64, AccessError> {
    column(row, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_system_permission_ids_are_internal_errors() {
        assert_eq!(system_permission(4).unwrap(), SystemPermission::Query);
        let err = system_permission(42).unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
