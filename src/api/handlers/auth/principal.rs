//! Authenticated principal extraction and authorization helpers.
//!
//! Flow Overview: read the bearer token, verify it as an `ACCESS_RESOURCES`
//! token against the stored user and their watermarks, then require an
//! activated, unlocked account.

use auth_token::Purpose;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorDomain};

use super::state::AuthState;
use super::storage::find_user_by_username;
use super::types::Role;

/// Authenticated user context derived from the bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|name| name == role.as_str())
    }

    /// # Errors
    /// Returns `403` when the principal lacks `role`.
    pub fn require_role(&self, role: Role) -> Result<(), ApiError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                ErrorDomain::Auth,
                format!("{role} role required"),
            ))
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve a bearer token into a principal, or return 401.
///
/// # Errors
/// Returns `401` for missing, invalid, stale or unusable credentials and `500`
/// when the user lookup fails.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<Principal, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    let now = Utc::now();
    let claims = auth_state
        .verify(token, Purpose::AccessResources, now)
        .map_err(|err| {
            debug!("Rejected access token: {err}");
            ApiError::unauthorized("Invalid access token")
        })?;

    let Some(user) = find_user_by_username(pool, &claims.sub).await? else {
        return Err(ApiError::unauthorized("Invalid access token"));
    };

    if let Err(err) = claims.ensure_fresh(&user.watermarks_ms()) {
        debug!("Rejected access token for {}: {err}", user.username);
        return Err(ApiError::unauthorized("Invalid access token"));
    }

    if !user.activated || !user.non_locked {
        return Err(ApiError::unauthorized("Account is disabled or locked"));
    }

    Ok(Principal {
        user_id: user.id,
        username: user.username,
        roles: user.roles,
    })
}
