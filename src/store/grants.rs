//! Resource permission grants.
//!
//! System and custom permissions live in parallel tables (`*_Sys` keyed by
//! system permission id, the others keyed by `ResourceClassPermission.PermissionId`).
//! [`GrantLookup`] describes one family of tables; both families share the
//! query and update logic through the trait's provided methods.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db::row_parsers::{grant_from_row, id_column, system_permission_column, text_column, GrantRow};
use crate::db::sql::push_in_list;
use crate::errors::AccessResult;
use crate::models::permission::PermissionName;
use crate::models::resource::{DomainId, ResourceClassId, ResourceId};

/// Which grants to read.
#[derive(Debug, Clone, Copy)]
pub enum GrantScope<'a> {
    /// Grants on one resource instance.
    Resource(ResourceId),
    /// Global grants on a resource class in any of the listed domains.
    Global {
        resource_class_id: ResourceClassId,
        domain_ids: &'a [DomainId],
    },
}

/// Which grant row to write.
#[derive(Debug, Clone, Copy)]
pub enum GrantTarget {
    Resource {
        resource_id: ResourceId,
        resource_class_id: ResourceClassId,
    },
    Global {
        resource_class_id: ResourceClassId,
        domain_id: DomainId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Instance,
    Global,
}

#[async_trait]
pub trait GrantLookup: Send + Sync {
    fn table(&self, table: Table) -> &'static str;

    /// Column holding the permission id.
    fn permission_column(&self) -> &'static str;

    /// Tail of the select list plus the `FROM` clause: whatever
    /// [`GrantLookup::decode`] reads, over `table` aliased as `g`.
    fn select_from(&self, table: Table) -> String;

    fn decode(&self, row: &SqliteRow) -> AccessResult<PermissionName>;

    /// Grants held by any of `accessors` in `scope`.
    ///
    /// `GrantRow::scope_id` is the accessed resource for instance grants and the
    /// accessed domain for global grants.
    async fn find(
        &self,
        conn: &mut SqliteConnection,
        accessors: &[ResourceId],
        scope: GrantScope<'_>,
    ) -> AccessResult<Vec<GrantRow<PermissionName>>> {
        let (table, scope_column) = match scope {
            GrantScope::Resource(_) => (Table::Instance, "AccessedResourceId"),
            GrantScope::Global { .. } => (Table::Global, "AccessedDomainId"),
        };

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT g.AccessorResourceId AS AccessorResourceId, g.IsWithGrant AS IsWithGrant, ");
        builder.push(format!("g.{scope_column} AS {scope_column}, "));
        builder.push(self.select_from(table));
        builder.push(" WHERE ");
        match scope {
            GrantScope::Resource(resource_id) => {
                builder.push("g.AccessedResourceId = ");
                builder.push_bind(resource_id);
            }
            GrantScope::Global {
                resource_class_id,
                domain_ids,
            } => {
                builder.push("g.ResourceClassId = ");
                builder.push_bind(resource_class_id);
                builder.push(" AND ");
                push_in_list(&mut builder, "g.AccessedDomainId", domain_ids.iter().copied());
            }
        }
        builder.push(" AND ");
        push_in_list(&mut builder, "g.AccessorResourceId", accessors.iter().copied());

        let rows = builder.build().fetch_all(&mut *conn).await?;
        rows.iter()
            .map(|row| grant_from_row(row, scope_column, |row| self.decode(row)))
            .collect()
    }

    /// Accessed resources of `resource_class_id` on which any of `accessors`
    /// directly holds `permission_id` (with grant option when `with_grant`).
    async fn find_accessed(
        &self,
        conn: &mut SqliteConnection,
        accessors: &[ResourceId],
        resource_class_id: ResourceClassId,
        permission_id: i64,
        with_grant: bool,
    ) -> AccessResult<Vec<ResourceId>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT DISTINCT AccessedResourceId FROM ");
        builder.push(self.table(Table::Instance));
        builder.push(" WHERE ResourceClassId = ");
        builder.push_bind(resource_class_id);
        builder.push(" AND ");
        builder.push(self.permission_column());
        builder.push(" = ");
        builder.push_bind(permission_id);
        if with_grant {
            builder.push(" AND IsWithGrant = 1");
        }
        builder.push(" AND ");
        push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());

        let rows = builder.build().fetch_all(&mut *conn).await?;
        rows.iter().map(|row| id_column(row, "AccessedResourceId")).collect()
    }

    /// Domains in which any of `accessors` holds a global grant of
    /// `permission_id` on `resource_class_id`.
    async fn find_global_domains(
        &self,
        conn: &mut SqliteConnection,
        accessors: &[ResourceId],
        resource_class_id: ResourceClassId,
        permission_id: i64,
        with_grant: bool,
    ) -> AccessResult<Vec<DomainId>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT DISTINCT AccessedDomainId FROM ");
        builder.push(self.table(Table::Global));
        builder.push(" WHERE ResourceClassId = ");
        builder.push_bind(resource_class_id);
        builder.push(" AND ");
        builder.push(self.permission_column());
        builder.push(" = ");
        builder.push_bind(permission_id);
        if with_grant {
            builder.push(" AND IsWithGrant = 1");
        }
        builder.push(" AND ");
        push_in_list(&mut builder, "AccessorResourceId", accessors.iter().copied());

        let rows = builder.build().fetch_all(&mut *conn).await?;
        rows.iter().map(|row| id_column(row, "AccessedDomainId")).collect()
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        accessor: ResourceId,
        grantor: ResourceId,
        target: GrantTarget,
        permission_id: i64,
        with_grant: bool,
    ) -> AccessResult<()> {
        let (table, scope_column, scope_id, resource_class_id) = target_columns(target);
        let sql = format!(
            "INSERT INTO {} (AccessorResourceId, GrantorResourceId, {scope_column}, ResourceClassId, {}, IsWithGrant) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.table(table),
            self.permission_column(),
        );
        sqlx::query(&sql)
            .bind(accessor)
            .bind(grantor)
            .bind(scope_id)
            .bind(resource_class_id)
            .bind(permission_id)
            .bind(with_grant)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Change the grant option (and record the new grantor) of an existing grant.
    async fn update(
        &self,
        conn: &mut SqliteConnection,
        accessor: ResourceId,
        grantor: ResourceId,
        target: GrantTarget,
        permission_id: i64,
        with_grant: bool,
    ) -> AccessResult<()> {
        let (table, scope_column, scope_id, resource_class_id) = target_columns(target);
        let sql = format!(
            "UPDATE {} SET GrantorResourceId = ?, IsWithGrant = ? \
             WHERE AccessorResourceId = ? AND {scope_column} = ? AND ResourceClassId = ? AND {} = ?",
            self.table(table),
            self.permission_column(),
        );
        sqlx::query(&sql)
            .bind(grantor)
            .bind(with_grant)
            .bind(accessor)
            .bind(scope_id)
            .bind(resource_class_id)
            .bind(permission_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        accessor: ResourceId,
        target: GrantTarget,
        permission_id: i64,
    ) -> AccessResult<()> {
        let (table, scope_column, scope_id, resource_class_id) = target_columns(target);
        let sql = format!(
            "DELETE FROM {} WHERE AccessorResourceId = ? AND {scope_column} = ? AND ResourceClassId = ? AND {} = ?",
            self.table(table),
            self.permission_column(),
        );
        sqlx::query(&sql)
            .bind(accessor)
            .bind(scope_id)
            .bind(resource_class_id)
            .bind(permission_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

fn target_columns(target: GrantTarget) -> (Table, &'static str, i64, ResourceClassId) {
    match target {
        GrantTarget::Resource {
            resource_id,
            resource_class_id,
        } => (Table::Instance, "AccessedResourceId", resource_id, resource_class_id),
        GrantTarget::Global {
            resource_class_id,
            domain_id,
        } => (Table::Global, "AccessedDomainId", domain_id, resource_class_id),
    }
}

/// `*INHERIT`, `*QUERY` and the other built-in resource permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGrants;

/// Permissions defined per resource class.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomGrants;

#[async_trait]
impl GrantLookup for SystemGrants {
    fn table(&self, table: Table) -> &'static str {
        match table {
            Table::Instance => "Grant_ResPerm_Sys",
            Table::Global => "Grant_Global_ResPerm_Sys",
        }
    }

    fn permission_column(&self) -> &'static str {
        "SysPermissionId"
    }

    fn select_from(&self, table: Table) -> String {
        format!("g.SysPermissionId AS SysPermissionId FROM {} g", self.table(table))
    }

    fn decode(&self, row: &SqliteRow) -> AccessResult<PermissionName> {
        Ok(PermissionName::System(system_permission_column(row, "SysPermissionId")?))
    }
}

#[async_trait]
impl GrantLookup for CustomGrants {
    fn table(&self, table: Table) -> &'static str {
        match table {
            Table::Instance => "Grant_ResPerm",
            Table::Global => "Grant_Global_ResPerm",
        }
    }

    fn permission_column(&self) -> &'static str {
        "PermissionId"
    }

    fn select_from(&self, table: Table) -> String {
        format!(
            "p.PermissionName AS PermissionName FROM {} g JOIN ResourceClassPermission p ON p.PermissionId = g.PermissionId",
            self.table(table)
        )
    }

    fn decode(&self, row: &SqliteRow) -> AccessResult<PermissionName> {
        Ok(PermissionName::Custom(text_column(row, "PermissionName")?))
    }
}

/// Both grant families, for reads that need every permission kind.
pub const ALL_GRANTS: [&dyn GrantLookup; 2] = [&SystemGrants, &CustomGrants];

/// The grant family that stores `name`.
pub fn grants_for(name: &PermissionName) -> &'static dyn GrantLookup {
    match name {
        PermissionName::System(_) => &SystemGrants,
        PermissionName::Custom(_) => &CustomGrants,
    }
}
