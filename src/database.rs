//! Schema snapshot sources.
//!
//! A [`SchemaSource`] yields the flat `(schema, table, column, data_type)`
//! rows that [`match_schema`](crate::schema::match_schema) and
//! [`schema_diff`](crate::schema::schema_diff) work on. PostgreSQL is read
//! through sqlx; a [`StaticSchema`] serves a snapshot kept on disk.

use crate::error::{SqlDepsError, SqlDepsResult};
use crate::profile::Profile;
use crate::schema::{match_schema, MatchRow, SchemaEntry};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;

/// Supplies a schema snapshot.
pub trait SchemaSource: Send + Sync {
    /// Columns of `target_schemas`; an empty slice means every user schema.
    fn fetch_schema(
        &self,
        target_schemas: &[String],
    ) -> impl Future<Output = SqlDepsResult<Vec<SchemaEntry>>> + Send;
}

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
}

impl FromStr for Dialect {
    type Err = SqlDepsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            _ => Err(SqlDepsError::UnsupportedDialect(s.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgresql"),
        }
    }
}

const COLUMNS_QUERY: &str = "\
SELECT table_schema::text, table_name::text, column_name::text, data_type::text
FROM information_schema.columns
WHERE (cardinality($1::text[]) = 0
       AND table_schema NOT IN ('pg_catalog', 'information_schema')
       AND table_schema NOT LIKE 'pg_toast%')
   OR table_schema = ANY($1)
ORDER BY table_schema, table_name, ordinal_position";

/// Live PostgreSQL schema, read from `information_schema.columns`.
#[derive(Debug, Clone)]
pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    /// Connect using a `postgres://` URL.
    pub async fn connect(url: &str) -> SqlDepsResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(|e| SqlDepsError::Schema(format!("Failed to connect: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SchemaSource for PgSchemaSource {
    async fn fetch_schema(&self, target_schemas: &[String]) -> SqlDepsResult<Vec<SchemaEntry>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(COLUMNS_QUERY)
            .bind(target_schemas)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SqlDepsError::Schema(format!("Failed to query columns: {}", e)))?;

        tracing::debug!("Fetched {} column(s) from information_schema", rows.len());
        Ok(rows
            .into_iter()
            .map(|(schema, table, column, data_type)| SchemaEntry {
                schema,
                table,
                column,
                data_type,
            })
            .collect())
    }
}

/// Snapshot held in memory, typically loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticSchema {
    entries: Vec<SchemaEntry>,
}

impl StaticSchema {
    pub fn new(entries: Vec<SchemaEntry>) -> Self {
        Self { entries }
    }

    /// Load a JSON array of `{schema, table, column, data_type}` objects.
    pub fn from_json_file(path: &Path) -> SqlDepsResult<Self> {
        if !path.exists() {
            return Err(SqlDepsError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<SchemaEntry> = serde_json::from_str(&content)?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }
}

impl SchemaSource for StaticSchema {
    async fn fetch_schema(&self, target_schemas: &[String]) -> SqlDepsResult<Vec<SchemaEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| target_schemas.is_empty() || target_schemas.contains(&e.schema))
            .cloned()
            .collect())
    }
}

/// Open a live schema source for `dialect`.
pub async fn connect(dialect: Dialect, url: &str) -> SqlDepsResult<PgSchemaSource> {
    match dialect {
        Dialect::Postgres => PgSchemaSource::connect(url).await,
    }
}

/// Match every reference of `profile` against the snapshot of `schemas`.
///
/// A failing source is returned as is; the profile itself is untouched.
pub async fn validate_profile<S: SchemaSource>(
    profile: &Profile,
    source: &S,
    schemas: &[String],
) -> SqlDepsResult<Vec<MatchRow>> {
    let corpus = source.fetch_schema(schemas).await?;
    let rows = match_schema(&profile.references(), &corpus);
    tracing::info!(
        "Matched {} row(s) against {} snapshot column(s)",
        rows.len(),
        corpus.len()
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot() -> StaticSchema {
        StaticSchema::new(vec![
            SchemaEntry::new("public", "users", "id", "integer"),
            SchemaEntry::new("public", "users", "email", "text"),
            SchemaEntry::new("sales", "orders", "id", "integer"),
            SchemaEntry::new("sales", "orders", "total", "numeric"),
        ])
    }

    struct Unreachable;

    impl SchemaSource for Unreachable {
        async fn fetch_schema(&self, _: &[String]) -> SqlDepsResult<Vec<SchemaEntry>> {
            Err(SqlDepsError::Schema("connection refused".to_string()))
        }
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("Postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        let err = "oracle".parse::<Dialect>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported database dialect: 'oracle'. Expected: postgresql"
        );
        assert_eq!(Dialect::Postgres.to_string(), "postgresql");
    }

    #[tokio::test]
    async fn test_static_schema_filters_schemas() {
        let source = snapshot();
        assert_eq!(source.fetch_schema(&[]).await.unwrap().len(), 4);

        let sales = source.fetch_schema(&["sales".to_string()]).await.unwrap();
        assert_eq!(sales.len(), 2);
        assert!(sales.iter().all(|e| e.schema == "sales"));
    }

    #[tokio::test]
    async fn test_validate_profile() {
        let profile = Profile::new(
            [("users", vec!["email"]), ("sales.orders", vec!["*"])],
            [("missing", vec!["x"])],
        );
        let rows = validate_profile(&profile, &snapshot(), &[]).await.unwrap();

        let found: Vec<_> = rows
            .iter()
            .map(|r| (r.schema.as_str(), r.table.as_str(), r.column.as_deref(), r.exact_match))
            .collect();
        assert_eq!(
            found,
            vec![
                ("public", "users", Some("email"), false),
                ("sales", "orders", Some("id"), true),
                ("sales", "orders", Some("total"), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_profile_source_failure() {
        let profile = Profile::new([("users", vec!["id"])], []);
        let err = validate_profile(&profile, &Unreachable, &[]).await.unwrap_err();
        assert!(matches!(err, SqlDepsError::Schema(_)));
    }

    #[test]
    fn test_static_schema_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"[{"schema": "public", "table": "users", "column": "id", "data_type": "integer"}]"#,
        )
        .unwrap();

        let source = StaticSchema::from_json_file(&path).unwrap();
        assert_eq!(
            source.entries(),
            &[SchemaEntry::new("public", "users", "id", "integer")]
        );

        let missing = StaticSchema::from_json_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(SqlDepsError::NotFound(_))));
    }
}
