//! Database helpers for accounts and queued token emails.

use anyhow::{Context, Result};
use auth_token::Purpose;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::types::{Role, UserView};
use super::utils::{is_unique_violation, violated_constraint};

const USER_SELECT: &str = r"
    SELECT
        u.id,
        u.first_name,
        u.last_name,
        u.username,
        u.email,
        u.password,
        u.activated,
        u.non_locked,
        u.created_at,
        u.updated_at,
        u.logout_from_all_devices_at,
        COALESCE(
            array_agg(r.name ORDER BY r.name) FILTER (WHERE r.name IS NOT NULL),
            '{}'
        ) AS roles
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
    LEFT JOIN roles r ON r.id = ur.role_id
";

/// Full account row, including the password hash and watermarks.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) first_name: String,
    pub(crate) last_name: String,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) activated: bool,
    pub(crate) non_locked: bool,
    pub(crate) roles: Vec<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) logout_from_all_devices_at: DateTime<Utc>,
}

impl UserRecord {
    /// Tokens issued before either of these instants (unix millis) are stale.
    pub(crate) fn watermarks_ms(&self) -> [i64; 2] {
        [
            self.updated_at.timestamp_millis(),
            self.logout_from_all_devices_at.timestamp_millis(),
        ]
    }

    pub(crate) fn view(&self) -> UserView {
        UserView {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            activated: self.activated,
            non_locked: self.non_locked,
            roles: self.roles.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password"),
        activated: row.get("activated"),
        non_locked: row.get("non_locked"),
        roles: row.get("roles"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        logout_from_all_devices_at: row.get("logout_from_all_devices_at"),
    }
}

/// Fields for a new account; the password is already hashed.
#[derive(Debug)]
pub(super) struct NewUser {
    pub(super) first_name: String,
    pub(super) last_name: String,
    pub(super) username: String,
    pub(super) email: String,
    pub(super) password_hash: String,
}

#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(UserRecord),
    UsernameTaken,
    EmailTaken,
}

/// A token email waiting in `email_outbox`.
#[derive(Debug)]
pub(super) struct OutboxEmail {
    to_email: String,
    template: &'static str,
    payload: serde_json::Value,
}

impl OutboxEmail {
    pub(super) fn token_email(
        to_email: &str,
        username: &str,
        first_name: &str,
        purpose: Purpose,
        token: &str,
        link: &str,
    ) -> Self {
        Self {
            to_email: to_email.to_string(),
            template: email_template(purpose),
            payload: json!({
                "username": username,
                "first_name": first_name,
                "purpose": purpose,
                "token": token,
                "link": link,
            }),
        }
    }
}

pub(super) fn email_template(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::ConfirmRegistration => "confirm_registration",
        Purpose::ForgotPassword => "forgot_password",
        Purpose::AccessResources => "access_resources",
    }
}

pub(crate) async fn find_user_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<UserRecord>> {
    let query = format!("{USER_SELECT} WHERE u.username = $1 GROUP BY u.id");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by username")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = format!("{USER_SELECT} WHERE u.email = $1 GROUP BY u.id");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.as_ref().map(user_from_row))
}

/// Look up a sign-in identifier, matching the username or the normalized email.
pub(super) async fn find_user_by_login(
    pool: &PgPool,
    username: &str,
    email_normalized: &str,
) -> Result<Option<UserRecord>> {
    let query = format!(
        "{USER_SELECT} WHERE u.username = $1 OR u.email = $2 GROUP BY u.id ORDER BY u.username = $1 DESC LIMIT 1"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(username)
        .bind(email_normalized)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user for sign-in")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(crate) async fn list_users(pool: &PgPool) -> Result<Vec<UserRecord>> {
    let query = format!("{USER_SELECT} GROUP BY u.id ORDER BY u.username");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list users")?;

    Ok(rows.iter().map(user_from_row).collect())
}

/// Create the account with the `USER` role and queue its confirmation email.
pub(super) async fn insert_user(
    pool: &PgPool,
    user: &NewUser,
    confirmation: &OutboxEmail,
    now: DateTime<Utc>,
) -> Result<SignupOutcome> {
    // User row, role grant and outbox row commit or roll back together.
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users
            (first_name, last_name, username, email, password,
             created_at, updated_at, logout_from_all_devices_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6, $6)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                let email_taken = violated_constraint(&err)
                    .is_some_and(|constraint| constraint.contains("email"));
                return Ok(if email_taken {
                    SignupOutcome::EmailTaken
                } else {
                    SignupOutcome::UsernameTaken
                });
            }
            return Err(err).context("failed to insert user");
        }
    };

    let query = r"
        INSERT INTO user_roles (user_id, role_id)
        SELECT $1, id FROM roles WHERE name = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(Role::User.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to grant default role")?;

    insert_outbox_row(&mut tx, confirmation).await?;

    tx.commit().await.context("commit signup transaction")?;

    find_user_by_username(pool, &user.username)
        .await?
        .context("created user not found")
        .map(SignupOutcome::Created)
}

/// Queue a token email on its own (no accompanying state change).
pub(super) async fn queue_email(pool: &PgPool, email: &OutboxEmail) -> Result<()> {
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for email outbox")?;
    insert_outbox_row(&mut conn, email).await
}

async fn insert_outbox_row(conn: &mut PgConnection, email: &OutboxEmail) -> Result<()> {
    let payload_text =
        serde_json::to_string(&email.payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&email.to_email)
        .bind(email.template)
        .bind(payload_text)
        .execute(conn)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;

    Ok(())
}

/// Activate the account and bump `updated_at`, which retires every older token.
///
/// Only applies while neither watermark is newer than `token_issued_at_ms`;
/// returns `false` when the token was already spent.
pub(super) async fn activate_user(
    pool: &PgPool,
    user_id: Uuid,
    token_issued_at_ms: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE users SET activated = TRUE, updated_at = $2
        WHERE id = $1
          AND floor(extract(epoch FROM updated_at) * 1000) <= $3
          AND floor(extract(epoch FROM logout_from_all_devices_at) * 1000) <= $3
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .bind(token_issued_at_ms)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to activate user")?;
    Ok(result.rows_affected() == 1)
}

/// Replace the password hash under the same freshness condition as
/// [`activate_user`].
pub(super) async fn update_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
    token_issued_at_ms: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = r"
        UPDATE users SET password = $2, updated_at = $3
        WHERE id = $1
          AND floor(extract(epoch FROM updated_at) * 1000) <= $4
          AND floor(extract(epoch FROM logout_from_all_devices_at) * 1000) <= $4
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .bind(now)
        .bind(token_issued_at_ms)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(result.rows_affected() == 1)
}

pub(super) async fn logout_from_all_devices(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    let query = "UPDATE users SET logout_from_all_devices_at = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(now)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record logout from all devices")?;
    Ok(())
}
