//! Query builder for filtering and sorting owners by attribute values
//!
//! Queries operate on one owner type at a time and return matching owner
//! ids. Filters compile to correlated `EXISTS` subqueries against the side
//! table; sorts compile to inner joins on the sort key, so owners lacking
//! that key are excluded from an ordered result (a match is required to
//! compute the sort value).
//!
//! ## Value semantics
//!
//! - Equality on scalar values compares the extracted JSON root, so numbers
//!   compare numerically and `5` does not match `"5"`.
//! - Equality on objects/arrays compares canonical (compact) JSON
//!   encodings.
//! - Patterns use SQL `LIKE` wildcards (`%`, `_`) and are only meaningful
//!   for string-coercible values.
//! - JSON paths are relative (`"tags"`, `"settings.theme"`) and are bound
//!   as parameters, never spliced into SQL.

use crate::connection::SqlitePool;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use serde_json::Value;
use sidetable_core::{AttributeError, AttributeResult, SortDirection};

/// A filter/sort query over one owner type's soft attributes
///
/// Consuming builder; finish with [`fetch_ids`](Self::fetch_ids). With no
/// filters and no sorts it returns every owner of the type that has at
/// least one attribute row, in unspecified order.
#[derive(Debug, Clone)]
pub struct AttributeQuery {
    owner_type: String,
    filters: Vec<Filter>,
    sorts: Vec<Sort>,
}

#[derive(Debug, Clone)]
enum Filter {
    Eq { key: String, value: Value },
    Like { key: String, pattern: String },
    JsonEq { key: String, path: String, value: Value },
    JsonLike { key: String, path: String, pattern: String },
    JsonContains { key: String, path: String, value: Value },
    JsonLength { key: String, path: String, length: i64 },
}

#[derive(Debug, Clone)]
struct Sort {
    key: String,
    path: Option<String>,
    direction: SortDirection,
}

impl AttributeQuery {
    /// Start a query over owners of the given type
    pub fn new(owner_type: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
        }
    }

    /// Owners having an attribute with exactly this (key, value)
    pub fn filter_eq(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::Eq {
            key: key.into(),
            value,
        });
        self
    }

    /// Owners whose value for `key` matches a `LIKE` pattern
    pub fn filter_like(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::Like {
            key: key.into(),
            pattern: pattern.into(),
        });
        self
    }

    /// Owners whose value at a JSON sub-path equals `value`
    pub fn filter_json_eq(
        mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        value: Value,
    ) -> Self {
        self.filters.push(Filter::JsonEq {
            key: key.into(),
            path: path.into(),
            value,
        });
        self
    }

    /// Owners whose value at a JSON sub-path matches a `LIKE` pattern
    pub fn filter_json_like(
        mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        self.filters.push(Filter::JsonLike {
            key: key.into(),
            path: path.into(),
            pattern: pattern.into(),
        });
        self
    }

    /// Owners whose JSON array at `path` contains `value`
    pub fn filter_json_contains(
        mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        value: Value,
    ) -> Self {
        self.filters.push(Filter::JsonContains {
            key: key.into(),
            path: path.into(),
            value,
        });
        self
    }

    /// Owners whose JSON array at `path` has exactly `length` elements
    pub fn filter_json_length(
        mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        length: i64,
    ) -> Self {
        self.filters.push(Filter::JsonLength {
            key: key.into(),
            path: path.into(),
            length,
        });
        self
    }

    /// Order owners by their value for `key`; owners lacking it are excluded
    pub fn sort_by(mut self, key: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(Sort {
            key: key.into(),
            path: None,
            direction,
        });
        self
    }

    /// Order owners by the value at a JSON sub-path of `key`
    ///
    /// The computed column alias is derived deterministically from
    /// (key, path) with path separators sanitized, so combining several
    /// such sorts cannot collide.
    pub fn sort_by_json(
        mut self,
        key: impl Into<String>,
        path: impl Into<String>,
        direction: SortDirection,
    ) -> Self {
        self.sorts.push(Sort {
            key: key.into(),
            path: Some(path.into()),
            direction,
        });
        self
    }

    /// Execute, returning matching owner ids
    pub async fn fetch_ids(self, pool: &SqlitePool) -> AttributeResult<Vec<i64>> {
        let pool = pool.clone();

        tokio::task::spawn_blocking(move || {
            let (sql, params) = self.to_sql();
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))?
                    .collect::<Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
        })
        .await
        .map_err(|e| AttributeError::backend(e.to_string()))?
        .map_err(Into::into)
    }

    /// Render the query as SQL plus its bound parameters
    ///
    /// Parameters appear in SQL text order: sort paths (select list), owner
    /// type (from clause), sort keys (joins), then per-filter key and
    /// predicate values.
    pub fn to_sql(&self) -> (String, Vec<SqlParam>) {
        let mut select_cols = vec!["o.modelable_id".to_string()];
        let mut select_params = Vec::new();
        let mut joins = String::new();
        let mut join_params = Vec::new();
        let mut order_terms = Vec::new();
        let mut seen_aliases: Vec<String> = Vec::new();

        for sort in &self.sorts {
            let alias = sort_alias(&sort.key, sort.path.as_deref());
            if !seen_aliases.contains(&alias) {
                let src = format!("{alias}_src");
                select_cols.push(format!("json_extract({src}.value, ?) AS {alias}"));
                select_params.push(SqlParam::Text(json_path(sort.path.as_deref())));
                joins.push_str(&format!(
                    " JOIN attributes AS {src} ON {src}.modelable_id = o.modelable_id \
                     AND {src}.modelable_type = o.modelable_type AND {src}.key = ?"
                ));
                join_params.push(SqlParam::Text(sort.key.clone()));
                seen_aliases.push(alias.clone());
            }
            order_terms.push(format!("{alias} {}", sort.direction.as_sql()));
        }

        let mut where_clauses = Vec::new();
        let mut where_params = Vec::new();
        for filter in &self.filters {
            let (pred, params) = filter.predicate();
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM attributes f \
                 WHERE f.modelable_id = o.modelable_id \
                 AND f.modelable_type = o.modelable_type \
                 AND f.key = ? AND {pred})"
            ));
            where_params.push(SqlParam::Text(filter.key().to_string()));
            where_params.extend(params);
        }

        let mut sql = format!(
            "SELECT {} FROM (SELECT DISTINCT modelable_id, modelable_type \
             FROM attributes WHERE modelable_type = ?) AS o{}",
            select_cols.join(", "),
            joins
        );
        if !where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clauses.join(" AND "));
        }
        if !order_terms.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_terms.join(", "));
        }

        let mut params = select_params;
        params.push(SqlParam::Text(self.owner_type.clone()));
        params.extend(join_params);
        params.extend(where_params);

        (sql, params)
    }
}

impl Filter {
    fn key(&self) -> &str {
        match self {
            Self::Eq { key, .. }
            | Self::Like { key, .. }
            | Self::JsonEq { key, .. }
            | Self::JsonLike { key, .. }
            | Self::JsonContains { key, .. }
            | Self::JsonLength { key, .. } => key,
        }
    }

    fn predicate(&self) -> (String, Vec<SqlParam>) {
        match self {
            Self::Eq { value, .. } => {
                if is_scalar(value) {
                    (
                        "json_extract(f.value, '$') = ?".to_string(),
                        vec![value_param(value)],
                    )
                } else {
                    // Composite values compare by canonical encoding.
                    ("f.value = ?".to_string(), vec![canonical_param(value)])
                }
            }
            Self::Like { pattern, .. } => (
                "json_extract(f.value, '$') LIKE ?".to_string(),
                vec![SqlParam::Text(pattern.clone())],
            ),
            Self::JsonEq { path, value, .. } => (
                "json_extract(f.value, ?) = ?".to_string(),
                vec![
                    SqlParam::Text(json_path(Some(path))),
                    if is_scalar(value) {
                        value_param(value)
                    } else {
                        canonical_param(value)
                    },
                ],
            ),
            Self::JsonLike { path, pattern, .. } => (
                "json_extract(f.value, ?) LIKE ?".to_string(),
                vec![
                    SqlParam::Text(json_path(Some(path))),
                    SqlParam::Text(pattern.clone()),
                ],
            ),
            Self::JsonContains { path, value, .. } => (
                "EXISTS (SELECT 1 FROM json_each(f.value, ?) WHERE json_each.value = ?)"
                    .to_string(),
                vec![SqlParam::Text(json_path(Some(path))), value_param(value)],
            ),
            Self::JsonLength { path, length, .. } => (
                "json_array_length(f.value, ?) = ?".to_string(),
                vec![SqlParam::Text(json_path(Some(path))), SqlParam::Int(*length)],
            ),
        }
    }
}

/// A bound SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Real(f64),
    Text(String),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Int(v) => v.to_sql(),
            Self::Real(v) => v.to_sql(),
            Self::Text(v) => v.to_sql(),
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Bind a JSON value the way SQLite's JSON functions surface it
fn value_param(value: &Value) -> SqlParam {
    match value {
        Value::String(s) => SqlParam::Text(s.clone()),
        Value::Bool(b) => SqlParam::Int(*b as i64),
        Value::Number(n) => n
            .as_i64()
            .map(SqlParam::Int)
            .or_else(|| n.as_f64().map(SqlParam::Real))
            .unwrap_or_else(|| SqlParam::Text(n.to_string())),
        other => canonical_param(other),
    }
}

fn canonical_param(value: &Value) -> SqlParam {
    SqlParam::Text(value.to_string())
}

/// Turn a relative path like `settings.theme` into a SQLite JSON path
fn json_path(path: Option<&str>) -> String {
    match path {
        None => "$".to_string(),
        Some(p) if p.starts_with('$') => p.to_string(),
        Some(p) => format!("$.{p}"),
    }
}

/// Deterministic column alias for a computed sort key
///
/// Derived from (key, path) with every non-alphanumeric character folded to
/// `_`, so two different sorts in the same query cannot collide unless they
/// are the same sort.
fn sort_alias(key: &str, path: Option<&str>) -> String {
    match path {
        None => format!("attr_{}", sanitize(key)),
        Some(p) => format!("attr_{}_{}", sanitize(key), sanitize(p)),
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
