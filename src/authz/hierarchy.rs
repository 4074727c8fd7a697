//! Transitive closures over the two hierarchies the resolver walks: resource
//! inheritance (INHERIT grants) and the domain tree.
//!
//! The store is not assumed to support recursive queries, so every closure is
//! computed by frontier expansion: each round issues one batched `IN (...)`
//! query for the ids discovered in the previous round, and the walk stops
//! when a round discovers nothing new. Ids already visited are never expanded
//! again, so the walk terminates on cyclic data as well.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db::row_parsers::id_column;
use crate::db::sql::push_in_list;
use crate::errors::AccessResult;
use crate::models::permission::SystemPermission;
use crate::models::resource::{DomainId, ResourceId};

/// Id → number of hops from the nearest seed (seeds are level 0).
pub type Closure = BTreeMap<i64, u32>;

async fn expand<F>(conn: &mut SqliteConnection, seeds: &[i64], next_round: F) -> AccessResult<Closure>
where
    F: Fn(&[i64]) -> QueryBuilder<'static, Sqlite>,
{
    let mut closure: Closure = seeds.iter().map(|id| (*id, 0)).collect();
    let mut frontier: Vec<i64> = closure.keys().copied().collect();
    let mut level = 0;

    while !frontier.is_empty() {
        level += 1;
        let mut query = next_round(&frontier);
        let rows = query.build().fetch_all(&mut *conn).await?;

        let mut discovered = Vec::new();
        for row in rows {
            let id = id_column(&row, "NextId")?;
            if let Entry::Vacant(entry) = closure.entry(id) {
                entry.insert(level);
                discovered.push(id);
            }
        }
        frontier = discovered;
    }

    Ok(closure)
}

/// Resources whose permissions `accessor` holds, i.e. the accessor itself plus
/// everything reachable over INHERIT grants (accessor → accessed).
///
/// IMPERSONATE does not extend this set; it only substitutes session identity.
pub async fn inherited_accessors(conn: &mut SqliteConnection, accessor: ResourceId) -> AccessResult<Closure> {
    expand(conn, &[accessor], |frontier| {
        let mut builder = QueryBuilder::new(
            "SELECT DISTINCT AccessedResourceId AS NextId FROM Grant_ResPerm_Sys WHERE SysPermissionId = ",
        );
        builder.push_bind(SystemPermission::Inherit.id());
        builder.push(" AND ");
        push_in_list(&mut builder, "AccessorResourceId", frontier.iter().copied());
        builder
    })
    .await
}

/// `domain` and every domain above it, keyed by distance.
pub async fn ancestor_domains(conn: &mut SqliteConnection, domain: DomainId) -> AccessResult<Closure> {
    expand(conn, &[domain], |frontier| {
        let mut builder = QueryBuilder::new(
            "SELECT DISTINCT ParentDomainId AS NextId FROM Domain WHERE ParentDomainId IS NOT NULL AND ",
        );
        push_in_list(&mut builder, "DomainId", frontier.iter().copied());
        builder
    })
    .await
}

/// Every domain in the subtrees rooted at `domains`, roots included.
pub async fn descendant_domains_of(conn: &mut SqliteConnection, domains: &[DomainId]) -> AccessResult<Closure> {
    expand(conn, domains, |frontier| {
        let mut builder = QueryBuilder::new("SELECT DomainId AS NextId FROM Domain WHERE ");
        push_in_list(&mut builder, "ParentDomainId", frontier.iter().copied());
        builder
    })
    .await
}

pub async fn descendant_domains(conn: &mut SqliteConnection, domain: DomainId) -> AccessResult<Closure> {
    descendant_domains_of(conn, &[domain]).await
}

/// Would `accessor` --INHERIT--> `donor` close a cycle?
pub async fn inherit_would_cycle(
    conn: &mut SqliteConnection,
    accessor: ResourceId,
    donor: ResourceId,
) -> AccessResult<bool> {
    if accessor == donor {
        return Ok(true);
    }
    let donor_closure = inherited_accessors(conn, donor).await?;
    Ok(donor_closure.contains_key(&accessor))
}

pub fn ids(closure: &Closure) -> Vec<i64> {
    closure.keys().copied().collect()
}
