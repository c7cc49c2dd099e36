//! Registration confirmation endpoints.

use auth_token::Purpose;
use axum::{
    Json,
    extract::{Extension, Query, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ErrorBody, ErrorDomain};

use super::state::AuthState;
use super::storage::{OutboxEmail, activate_user, find_user_by_username, queue_email};
use super::types::{ConfirmRegistrationQuery, ResendConfirmationRequest};
use super::utils::build_token_url;
use super::verification::verify_user_token;

/// Activate the account named by a `CONFIRM_REGISTRATION` token.
///
/// Activation bumps `updated_at`, so the same link cannot be used twice.
#[utoipa::path(
    get,
    path = "/v1/auth/confirm-registration",
    params(
        ("token" = String, Query, description = "Token from the confirmation email")
    ),
    responses(
        (status = 204, description = "Account activated"),
        (status = 403, description = "Invalid token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn confirm_registration(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Query(query): Query<ConfirmRegistrationQuery>,
) -> Result<Response, ApiError> {
    let token = query.token.unwrap_or_default();
    let now = Utc::now();
    let verified =
        verify_user_token(&pool, &auth_state, &token, Purpose::ConfirmRegistration, now).await?;

    if !activate_user(&pool, verified.user.id, verified.issued_at_ms, now).await? {
        return Err(ApiError::invalid_token());
    }
    info!(username = %verified.user.username, "account activated");

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Issue a fresh confirmation token for an account that is not active yet.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-confirmation-email",
    request_body = ResendConfirmationRequest,
    responses(
        (status = 204, description = "Confirmation email queued"),
        (status = 403, description = "Account already activated", body = ErrorBody),
        (status = 404, description = "Unknown user", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_confirmation_email(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ResendConfirmationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::bad_request(ErrorDomain::User, "Missing username"));
    }

    let Some(user) = find_user_by_username(&pool, username).await? else {
        return Err(ApiError::not_found(ErrorDomain::User, "User not found"));
    };
    if user.activated {
        return Err(ApiError::forbidden(
            ErrorDomain::User,
            "Account already activated",
        ));
    }

    let token = auth_state
        .issue(&user.username, Purpose::ConfirmRegistration, Utc::now())
        .map_err(anyhow::Error::from)?;
    let link = build_token_url(
        auth_state.config().frontend_base_url(),
        "confirm-registration",
        &token,
    );
    let email = OutboxEmail::token_email(
        &user.email,
        &user.username,
        &user.first_name,
        Purpose::ConfirmRegistration,
        &token,
        &link,
    );
    queue_email(&pool, &email).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
