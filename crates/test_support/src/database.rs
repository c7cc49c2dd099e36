//! A migrated Postgres database for one test.

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection, PgPool, postgres::PgPoolOptions};

use crate::postgres::PostgresContainer;

pub struct TestDatabase {
    _postgres: PostgresContainer,
    pool: PgPool,
    dsn: String,
}

impl TestDatabase {
    /// Start Postgres, apply `schema_sql`, and open a small pool.
    ///
    /// Returns `Ok(None)` only when no container runtime is reachable.
    ///
    /// # Errors
    /// Returns an error when the container, the schema or the pool fails.
    pub async fn start(schema_sql: &str) -> Result<Option<Self>> {
        if let Err(err) = crate::runtime::ensure_container_runtime() {
            eprintln!("Skipping database test: {err}");
            return Ok(None);
        }

        let postgres = PostgresContainer::start().await?;
        postgres.wait_until_ready().await?;
        let dsn = postgres.dsn();
        apply_schema(&dsn, schema_sql).await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&dsn)
            .await
            .context("failed to connect test pool")?;

        Ok(Some(Self {
            _postgres: postgres,
            pool,
            dsn,
        }))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }
}

async fn apply_schema(dsn: &str, schema_sql: &str) -> Result<()> {
    let mut connection = PgConnection::connect(dsn)
        .await
        .context("failed to connect for schema setup")?;

    for (index, statement) in split_sql_statements(schema_sql).iter().enumerate() {
        sqlx::query(statement)
            .execute(&mut connection)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }

    Ok(())
}

/// Split a schema file into statements on lines ending with `;`.
///
/// Comment-only chunks are dropped; statements must not contain `;` at a line end
/// except as their terminator.
#[must_use]
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}
