use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

use super::types::{Department, PAGE_SIZE};

fn department_from_row(row: &PgRow) -> Department {
    Department {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Return one page (1-based) and the total row count.
pub(super) async fn list_page(pool: &PgPool, page: i64) -> Result<(Vec<Department>, i64)> {
    let offset = (page - 1).saturating_mul(PAGE_SIZE);
    let query = r"
        SELECT id, name, created_at, updated_at
        FROM departments
        ORDER BY id
        LIMIT $1 OFFSET $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list departments")?;

    let query = "SELECT COUNT(*) AS total FROM departments";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let total: i64 = sqlx::query(query)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count departments")?
        .get("total");

    Ok((rows.iter().map(department_from_row).collect(), total))
}

pub(super) async fn find(pool: &PgPool, id: i64) -> Result<Option<Department>> {
    let query = "SELECT id, name, created_at, updated_at FROM departments WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load department")?;
    Ok(row.as_ref().map(department_from_row))
}

pub(super) async fn insert(pool: &PgPool, name: &str, now: DateTime<Utc>) -> Result<Department> {
    let query = r"
        INSERT INTO departments (name, created_at, updated_at)
        VALUES ($1, $2, $2)
        RETURNING id, name, created_at, updated_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(now)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert department")?;
    Ok(department_from_row(&row))
}

pub(super) async fn update(
    pool: &PgPool,
    id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Option<Department>> {
    let query = r"
        UPDATE departments
        SET name = $2, updated_at = $3
        WHERE id = $1
        RETURNING id, name, created_at, updated_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .bind(name)
        .bind(now)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to update department")?;
    Ok(row.as_ref().map(department_from_row))
}

/// Returns `false` when no department had `id`.
pub(super) async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
    let query = "DELETE FROM departments WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete department")?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::database::TestDatabase;

    const WARDEN_SCHEMA_SQL: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    #[tokio::test]
    async fn crud_round_trip() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();

        let created = insert(pool, "Research", Utc::now()).await?;
        assert_eq!(find(pool, created.id).await?, Some(created.clone()));

        let renamed = update(pool, created.id, "Development", Utc::now()).await?;
        assert_eq!(renamed.map(|dept| dept.name), Some("Development".to_string()));
        assert!(update(pool, created.id + 1000, "Nope", Utc::now()).await?.is_none());

        assert!(delete(pool, created.id).await?);
        assert!(!delete(pool, created.id).await?);
        assert!(find(pool, created.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn pages_hold_eleven_rows_ordered_by_id() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        for index in 0..13 {
            insert(pool, &format!("Dept {index}"), Utc::now()).await?;
        }

        let (first, total) = list_page(pool, 1).await?;
        assert_eq!(total, 13);
        assert_eq!(first.len(), 11);
        assert!(first.windows(2).all(|pair| pair[0].id < pair[1].id));

        let (second, _) = list_page(pool, 2).await?;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].name, "Dept 11");

        let (empty, _) = list_page(pool, 3).await?;
        assert!(empty.is_empty());
        Ok(())
    }
}
