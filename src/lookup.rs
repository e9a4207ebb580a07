//! Name resolution against the relational reference tables.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::JunctionKind;
use crate::query::{bind_scalar, Bind, SelectBuilder};

/// `qc_form_template.name` for `template_id`.
pub async fn resolve_template_name(pool: &SqlitePool, template_id: i64) -> Result<Option<String>> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM qc_form_template WHERE id = ?")
        .bind(template_id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

/// Current display name of a related entity. Unknown ids and null names
/// both resolve to `None`.
pub async fn resolve_entity_name(
    conn: &mut SqliteConnection,
    kind: JunctionKind,
    entity_id: &str,
) -> Result<Option<String>> {
    let (table, column) = kind.lookup();
    let (sql, binds) = SelectBuilder::new(column, table)
        .filter("id = ?", [Bind::Text(entity_id.to_string())])
        .limit(1)
        .build();

    let name = bind_scalar(sqlx::query_scalar::<_, Option<String>>(&sql), &binds)
        .fetch_optional(&mut *conn)
        .await?
        .flatten();
    Ok(name)
}
