//! Token gate for the emailed flows.
//!
//! Flow Overview: check the token itself (signature, issuer, expiry, purpose),
//! resolve its subject to a stored user, then reject it if it predates either
//! freshness watermark. Every failure collapses into one `403 Invalid token`
//! so callers cannot tell which check failed.

use auth_token::Purpose;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::api::error::ApiError;

use super::state::AuthState;
use super::storage::{UserRecord, find_user_by_username};

/// A user resolved from an emailed token.
///
/// Writes that consume the token must be conditioned on `issued_at_ms` so two
/// concurrent requests cannot both spend it.
#[derive(Debug)]
pub(crate) struct VerifiedToken {
    pub(crate) user: UserRecord,
    pub(crate) issued_at_ms: i64,
}

/// Resolve a purpose-tagged token to the fresh user it was issued for.
pub(crate) async fn verify_user_token(
    pool: &PgPool,
    auth_state: &AuthState,
    token: &str,
    purpose: Purpose,
    now: DateTime<Utc>,
) -> Result<VerifiedToken, ApiError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::invalid_token());
    }

    let claims = auth_state.verify(token, purpose, now).map_err(|err| {
        debug!("Rejected {purpose} token: {err}");
        ApiError::invalid_token()
    })?;

    let Some(user) = find_user_by_username(pool, &claims.sub).await? else {
        debug!("Rejected {purpose} token: unknown subject");
        return Err(ApiError::invalid_token());
    };

    claims
        .ensure_subject(&user.username)
        .and_then(|()| claims.ensure_fresh(&user.watermarks_ms()))
        .map_err(|err| {
            debug!("Rejected {purpose} token for {}: {err}", user.username);
            ApiError::invalid_token()
        })?;

    Ok(VerifiedToken {
        user,
        issued_at_ms: claims.iat_ms,
    })
}
