//! Bulk account updates keyed by username.
//!
//! Unknown usernames are skipped; callers get the number of rows touched.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

use crate::api::handlers::auth::Role;

/// Boolean account flags an admin may flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AccountFlag {
    Activated,
    NonLocked,
}

impl AccountFlag {
    fn update_query(self) -> &'static str {
        match self {
            Self::Activated => {
                "UPDATE users SET activated = $2, updated_at = $3 WHERE username = ANY($1)"
            }
            Self::NonLocked => {
                "UPDATE users SET non_locked = $2, updated_at = $3 WHERE username = ANY($1)"
            }
        }
    }
}

pub(super) async fn set_flag(
    pool: &PgPool,
    usernames: &[String],
    flag: AccountFlag,
    value: bool,
    now: DateTime<Utc>,
) -> Result<u64> {
    let query = flag.update_query();
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(usernames)
        .bind(value)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .with_context(|| format!("failed to update {flag:?}"))?;
    Ok(result.rows_affected())
}

pub(super) async fn force_logout(
    pool: &PgPool,
    usernames: &[String],
    now: DateTime<Utc>,
) -> Result<u64> {
    let query = "UPDATE users SET logout_from_all_devices_at = $2 WHERE username = ANY($1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(usernames)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to force logout")?;
    Ok(result.rows_affected())
}

/// Replace the role set of every named user in one transaction.
pub(super) async fn replace_roles(
    pool: &PgPool,
    usernames: &[String],
    roles: &[Role],
    now: DateTime<Utc>,
) -> Result<u64> {
    let role_names: Vec<String> = roles.iter().map(|role| role.as_str().to_string()).collect();
    let mut tx = pool.begin().await.context("begin role change transaction")?;

    let query = r"
        DELETE FROM user_roles
        WHERE user_id IN (SELECT id FROM users WHERE username = ANY($1))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(usernames)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to clear roles")?;

    let query = r"
        INSERT INTO user_roles (user_id, role_id)
        SELECT u.id, r.id
        FROM users u
        CROSS JOIN roles r
        WHERE u.username = ANY($1) AND r.name = ANY($2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(usernames)
        .bind(&role_names)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to grant roles")?;

    let query = "UPDATE users SET updated_at = $2 WHERE username = ANY($1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(usernames)
        .bind(now)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to bump updated_at after role change")?;

    tx.commit().await.context("commit role change transaction")?;

    Ok(result.rows_affected())
}

/// Delete the named users; their role grants cascade.
pub(super) async fn delete_users(pool: &PgPool, usernames: &[String]) -> Result<u64> {
    let query = "DELETE FROM users WHERE username = ANY($1)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(usernames)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete users")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::storage::find_user_by_username;
    use anyhow::Context;
    use chrono::Duration;
    use sqlx::Row;
    use test_support::database::TestDatabase;

    const WARDEN_SCHEMA_SQL: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    async fn seed_user(pool: &PgPool, username: &str) -> Result<()> {
        let query = r"
            INSERT INTO users (first_name, last_name, username, email, password, activated)
            VALUES ('Test', 'User', $1, $1 || '@example.com', 'hash', TRUE)
        ";
        sqlx::query(query).bind(username).execute(pool).await?;
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) SELECT u.id, r.id FROM users u, roles r WHERE u.username = $1 AND r.name = 'USER'",
        )
        .bind(username)
        .execute(pool)
        .await?;
        Ok(())
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn flag_queries_target_their_column() {
        assert!(AccountFlag::Activated.update_query().contains("activated = $2"));
        assert!(AccountFlag::NonLocked.update_query().contains("non_locked = $2"));
    }

    #[tokio::test]
    async fn set_flag_skips_unknown_usernames() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        seed_user(pool, "alice").await?;
        seed_user(pool, "bob").await?;

        let now = Utc::now();
        let touched = set_flag(
            pool,
            &names(&["alice", "ghost"]),
            AccountFlag::NonLocked,
            false,
            now,
        )
        .await?;
        assert_eq!(touched, 1);

        let alice = find_user_by_username(pool, "alice")
            .await?
            .context("alice missing")?;
        let bob = find_user_by_username(pool, "bob")
            .await?
            .context("bob missing")?;
        assert!(!alice.non_locked);
        assert_eq!(alice.updated_at.timestamp_millis(), now.timestamp_millis());
        assert!(bob.non_locked);
        Ok(())
    }

    #[tokio::test]
    async fn replace_roles_swaps_role_set() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        seed_user(pool, "alice").await?;

        let before = find_user_by_username(pool, "alice")
            .await?
            .context("alice missing")?;
        let first_at = before.updated_at + Duration::seconds(10);
        replace_roles(pool, &names(&["alice"]), &[Role::Admin], first_at).await?;
        let alice = find_user_by_username(pool, "alice")
            .await?
            .context("alice missing")?;
        assert_eq!(alice.roles, vec!["ADMIN".to_string()]);
        assert_eq!(alice.updated_at.timestamp_millis(), first_at.timestamp_millis());

        let second_at = first_at + Duration::seconds(5);
        replace_roles(
            pool,
            &names(&["alice"]),
            &[Role::User, Role::Admin],
            second_at,
        )
        .await?;
        let alice = find_user_by_username(pool, "alice")
            .await?
            .context("alice missing")?;
        assert_eq!(alice.roles, vec!["ADMIN".to_string(), "USER".to_string()]);
        assert_eq!(alice.updated_at.timestamp_millis(), second_at.timestamp_millis());
        Ok(())
    }

    #[tokio::test]
    async fn force_logout_and_delete() -> Result<()> {
        let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
            return Ok(());
        };
        let pool = db.pool();
        seed_user(pool, "alice").await?;
        seed_user(pool, "bob").await?;

        let now = Utc::now();
        assert_eq!(force_logout(pool, &names(&["alice"]), now).await?, 1);
        let alice = find_user_by_username(pool, "alice")
            .await?
            .context("alice missing")?;
        assert_eq!(
            alice.logout_from_all_devices_at.timestamp_millis(),
            now.timestamp_millis()
        );

        assert_eq!(delete_users(pool, &names(&["alice", "bob", "ghost"])).await?, 2);
        let row = sqlx::query("SELECT COUNT(*) AS total FROM user_roles")
            .fetch_one(pool)
            .await?;
        assert_eq!(row.get::<i64, _>("total"), 0);
        Ok(())
    }
}
