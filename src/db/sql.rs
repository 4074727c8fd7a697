use sqlx::{QueryBuilder, Sqlite};

/// Append `column IN (?, ?, ...)` binding every id.
///
/// SQLite accepts an empty list (`IN ()` matches nothing), so callers need not
/// special-case it.
pub fn push_in_list<'a, I>(builder: &mut QueryBuilder<'a, Sqlite>, column: &str, ids: I)
where
    I: IntoIterator<Item = i64>,
{
    builder.push(column);
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_placeholder_list() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT 1 FROM Resource WHERE ");
        push_in_list(&mut builder, "ResourceId", [1, 2, 3]);
        assert_eq!(builder.sql(), "SELECT 1 FROM Resource WHERE ResourceId IN (?, ?, ?)");
    }
}
