//! Database-backed auth tests.
//!
//! Each test starts its own Postgres container and returns early when no
//! container runtime is available.

use super::AuthConfig;
use super::state::AuthState;
use super::storage::{
    NewUser, OutboxEmail, SignupOutcome, activate_user, find_user_by_email, find_user_by_login,
    find_user_by_username, insert_user, logout_from_all_devices, queue_email, update_password,
};
use super::verification::verify_user_token;
use crate::api::error::ApiError;
use anyhow::{Context, Result, anyhow};
use auth_token::{Purpose, TokenKeys};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use test_support::database::TestDatabase;

const WARDEN_SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

fn auth_state() -> Result<AuthState> {
    Ok(AuthState::new(
        AuthConfig::new("https://warden.dev".to_string()),
        TokenKeys::from_secret(b"auth-db-test-secret-0123456789abcdef", "warden")?,
    ))
}

fn new_user(username: &str, email: &str) -> NewUser {
    NewUser {
        first_name: "Alice".to_string(),
        last_name: "Liddell".to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
    }
}

fn confirmation(email: &str, username: &str) -> OutboxEmail {
    OutboxEmail::token_email(
        email,
        username,
        "Alice",
        Purpose::ConfirmRegistration,
        "token",
        "https://warden.dev/confirm-registration?token=token",
    )
}

async fn outbox_count(pool: &PgPool, template: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM email_outbox WHERE template = $1")
        .bind(template)
        .fetch_one(pool)
        .await?;
    Ok(row.get("total"))
}

async fn create_user(pool: &PgPool, username: &str, email: &str) -> Result<()> {
    create_user_at(pool, username, email, Utc::now()).await
}

async fn create_user_at(
    pool: &PgPool,
    username: &str,
    email: &str,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    match insert_user(pool, &new_user(username, email), &confirmation(email, username), now).await? {
        SignupOutcome::Created(_) => Ok(()),
        other => Err(anyhow!("unexpected signup outcome: {other:?}")),
    }
}

#[tokio::test]
async fn insert_user_grants_user_role_and_queues_email() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();

    let now = Utc::now();
    let outcome = insert_user(
        pool,
        &new_user("alice", "alice@example.com"),
        &confirmation("alice@example.com", "alice"),
        now,
    )
    .await?;

    let SignupOutcome::Created(user) = outcome else {
        return Err(anyhow!("expected user to be created"));
    };
    assert_eq!(user.roles, vec!["USER".to_string()]);
    assert!(!user.activated);
    assert!(user.non_locked);
    assert_eq!(user.updated_at.timestamp_millis(), now.timestamp_millis());
    assert_eq!(outbox_count(pool, "confirm_registration").await?, 1);
    Ok(())
}

#[tokio::test]
async fn insert_user_reports_which_field_conflicts() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();
    create_user(pool, "alice", "alice@example.com").await?;

    let outcome = insert_user(
        pool,
        &new_user("alice", "other@example.com"),
        &confirmation("other@example.com", "alice"),
        Utc::now(),
    )
    .await?;
    assert!(matches!(outcome, SignupOutcome::UsernameTaken));

    let outcome = insert_user(
        pool,
        &new_user("bob", "alice@example.com"),
        &confirmation("alice@example.com", "bob"),
        Utc::now(),
    )
    .await?;
    assert!(matches!(outcome, SignupOutcome::EmailTaken));

    // Rolled back conflicts leave no outbox rows behind.
    assert_eq!(outbox_count(pool, "confirm_registration").await?, 1);
    Ok(())
}

#[tokio::test]
async fn lookups_by_username_email_and_login() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();
    create_user(pool, "alice", "alice@example.com").await?;

    assert!(find_user_by_username(pool, "alice").await?.is_some());
    assert!(find_user_by_username(pool, "nobody").await?.is_none());
    assert!(find_user_by_email(pool, "alice@example.com").await?.is_some());

    let by_name = find_user_by_login(pool, "alice", "alice").await?;
    let by_email = find_user_by_login(pool, "Alice@Example.com", "alice@example.com").await?;
    assert_eq!(
        by_name.map(|user| user.username),
        by_email.map(|user| user.username)
    );
    Ok(())
}

#[tokio::test]
async fn confirmation_token_is_single_use() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();
    let state = auth_state()?;

    let signup_at = Utc::now();
    insert_user(
        pool,
        &new_user("alice", "alice@example.com"),
        &confirmation("alice@example.com", "alice"),
        signup_at,
    )
    .await?;
    let token = state.issue("alice", Purpose::ConfirmRegistration, signup_at)?;

    let confirm_at = signup_at + Duration::seconds(5);
    let verified =
        verify_user_token(pool, &state, &token, Purpose::ConfirmRegistration, confirm_at)
            .await
            .map_err(|err| anyhow!("token rejected: {err}"))?;
    assert!(activate_user(pool, verified.user.id, verified.issued_at_ms, confirm_at).await?);

    let activated = find_user_by_username(pool, "alice")
        .await?
        .context("user missing")?;
    assert!(activated.activated);

    let replay =
        verify_user_token(pool, &state, &token, Purpose::ConfirmRegistration, confirm_at).await;
    assert!(matches!(replay, Err(ApiError::Forbidden { .. })));
    Ok(())
}

#[tokio::test]
async fn token_verified_twice_is_only_spent_once() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();
    let state = auth_state()?;

    let signup_at = Utc::now();
    create_user_at(pool, "alice", "alice@example.com", signup_at).await?;
    let token = state.issue("alice", Purpose::ForgotPassword, signup_at)?;

    // Both requests pass the gate before either one writes.
    let reset_at = signup_at + Duration::seconds(5);
    let first = verify_user_token(pool, &state, &token, Purpose::ForgotPassword, reset_at)
        .await
        .map_err(|err| anyhow!("token rejected: {err}"))?;
    let second = verify_user_token(pool, &state, &token, Purpose::ForgotPassword, reset_at)
        .await
        .map_err(|err| anyhow!("token rejected: {err}"))?;

    assert!(update_password(pool, first.user.id, "first-hash", first.issued_at_ms, reset_at).await?);
    assert!(
        !update_password(
            pool,
            second.user.id,
            "second-hash",
            second.issued_at_ms,
            reset_at + Duration::milliseconds(1),
        )
        .await?
    );

    let stored = find_user_by_username(pool, "alice")
        .await?
        .context("user missing")?;
    assert_eq!(stored.password_hash, "first-hash");
    assert_eq!(stored.updated_at.timestamp_millis(), reset_at.timestamp_millis());

    // Same for activation with a confirmation token minted before the reset.
    let confirm = state.issue("alice", Purpose::ConfirmRegistration, signup_at)?;
    let claims = state.verify(&confirm, Purpose::ConfirmRegistration, reset_at)?;
    assert!(!activate_user(pool, stored.id, claims.iat_ms, reset_at).await?);
    Ok(())
}

#[tokio::test]
async fn password_update_and_logout_retire_older_tokens() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();
    let state = auth_state()?;
    let start = Utc::now();
    insert_user(
        pool,
        &new_user("alice", "alice@example.com"),
        &confirmation("alice@example.com", "alice"),
        start,
    )
    .await?;
    let user = find_user_by_username(pool, "alice")
        .await?
        .context("user missing")?;

    let early = state.issue("alice", Purpose::AccessResources, start + Duration::seconds(1))?;
    let issued_ms = (start + Duration::seconds(1)).timestamp_millis();
    assert!(update_password(pool, user.id, "new-hash", issued_ms, start + Duration::seconds(2)).await?);
    let reloaded = find_user_by_username(pool, "alice")
        .await?
        .context("user missing")?;
    assert_eq!(reloaded.password_hash, "new-hash");
    let claims = state.verify(&early, Purpose::AccessResources, start + Duration::seconds(3))?;
    assert!(claims.ensure_fresh(&reloaded.watermarks_ms()).is_err());

    let late = state.issue("alice", Purpose::AccessResources, start + Duration::seconds(3))?;
    logout_from_all_devices(pool, user.id, start + Duration::seconds(4)).await?;
    let reloaded = find_user_by_username(pool, "alice")
        .await?
        .context("user missing")?;
    let claims = state.verify(&late, Purpose::AccessResources, start + Duration::seconds(5))?;
    assert!(claims.ensure_fresh(&reloaded.watermarks_ms()).is_err());
    Ok(())
}

#[tokio::test]
async fn queue_email_inserts_pending_row() -> Result<()> {
    let Some(db) = TestDatabase::start(WARDEN_SCHEMA_SQL).await? else {
        return Ok(());
    };
    let pool = db.pool();

    let message = OutboxEmail::token_email(
        "alice@example.com",
        "alice",
        "Alice",
        Purpose::ForgotPassword,
        "token",
        "https://warden.dev/reset-password?token=token",
    );
    queue_email(pool, &message).await?;

    let row = sqlx::query(
        "SELECT status, payload_json->>'purpose' AS purpose FROM email_outbox WHERE template = 'forgot_password'",
    )
    .fetch_one(pool)
    .await?;
    assert_eq!(row.get::<String, _>("status"), "pending");
    assert_eq!(row.get::<String, _>("purpose"), "FORGOT_PASSWORD");
    Ok(())
}
