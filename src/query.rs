//! Composable SELECT builder.
//!
//! Read queries with optional filters are assembled from a predicate list
//! and a join list rather than by string concatenation. Every value is a
//! bound parameter, whichever filters end up active.

use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::query::{Query, QueryScalar};

use crate::models::{format_ts, SnapshotWindow};

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Text(String),
    Real(f64),
}

#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    columns: String,
    from: String,
    joins: Vec<String>,
    predicates: Vec<String>,
    binds: Vec<Bind>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<i64>,
}

impl SelectBuilder {
    pub fn new(columns: &str, from: &str) -> Self {
        Self {
            columns: columns.to_string(),
            from: from.to_string(),
            ..Default::default()
        }
    }

    pub fn join(mut self, clause: &str) -> Self {
        self.joins.push(clause.to_string());
        self
    }

    /// Add a predicate. `binds` must match the `?` count of `sql`.
    pub fn filter(mut self, sql: &str, binds: impl IntoIterator<Item = Bind>) -> Self {
        self.predicates.push(format!("({})", sql));
        self.binds.extend(binds);
        self
    }

    /// Add a predicate only when `value` is present.
    pub fn filter_opt<T>(self, sql: &str, value: Option<T>, bind: impl FnOnce(T) -> Bind) -> Self {
        match value {
            Some(v) => self.filter(sql, [bind(v)]),
            None => self,
        }
    }

    /// Restrict `column` to the half-open window. Compared through
    /// `julianday` so stored text with or without an offset lines up.
    pub fn within(self, column: &str, window: &SnapshotWindow) -> Self {
        let sql = format!(
            "julianday({col}) >= julianday(?) AND julianday({col}) < julianday(?)",
            col = column
        );
        self.filter(
            &sql,
            [
                Bind::Text(format_ts(window.start)),
                Bind::Text(format_ts(window.end)),
            ],
        )
    }

    pub fn group_by(mut self, clause: &str) -> Self {
        self.group_by = Some(clause.to_string());
        self
    }

    pub fn order_by(mut self, clause: &str) -> Self {
        self.order_by = Some(clause.to_string());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the SQL text and the bind list in placeholder order.
    pub fn build(&self) -> (String, Vec<Bind>) {
        let mut sql = format!("SELECT {} FROM {}", self.columns, self.from);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if let Some(group) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        let mut binds = self.binds.clone();
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Bind::Int(limit));
        }
        (sql, binds)
    }
}

pub fn bind_query<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: &[Bind],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
            Bind::Real(v) => query.bind(*v),
        };
    }
    query
}

pub fn bind_scalar<'q, O>(
    mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    binds: &[Bind],
) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
            Bind::Real(v) => query.bind(*v),
        };
    }
    query
}
