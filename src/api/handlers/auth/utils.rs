//! Small helpers for auth input validation, password hashing and token links.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use regex::Regex;

const PASSWORD_MIN_CHARS: usize = 8;
const PASSWORD_MAX_CHARS: usize = 64;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// First and last names: 1-50 letters.
pub(super) fn valid_name(name: &str) -> bool {
    Regex::new(r"^\p{L}{1,50}$").is_ok_and(|regex| regex.is_match(name))
}

pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._-]{3,20}$").is_ok_and(|regex| regex.is_match(username))
}

/// Check password strength and confirmation, returning the first problem found.
pub(super) fn check_password(password: &str, confirm_password: &str) -> Result<(), &'static str> {
    let length = password.chars().count();
    if !(PASSWORD_MIN_CHARS..=PASSWORD_MAX_CHARS).contains(&length) {
        return Err("Password must be 8-64 characters long");
    }
    if !password.chars().any(char::is_lowercase)
        || !password.chars().any(char::is_uppercase)
        || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err("Password must contain a lowercase letter, an uppercase letter and a digit");
    }
    if password != confirm_password {
        return Err("Passwords do not match");
    }
    Ok(())
}

/// Hash a password into an argon2 PHC string off the async runtime.
pub(super) async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    })
    .await
    .context("password hashing task failed")?
}

/// Verify a password against a stored PHC string off the async runtime.
pub(super) async fn verify_password(password: String, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || -> Result<bool> {
        let parsed =
            PasswordHash::new(&stored_hash).map_err(|_| anyhow!("invalid stored password hash"))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("password verification task failed")?
}

/// Build a frontend link carrying an emailed token.
pub(super) fn build_token_url(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}?token={token}")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated constraint, when the database reports one.
pub(super) fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}
