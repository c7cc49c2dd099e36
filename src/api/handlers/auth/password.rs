//! Forgotten password flow.

use auth_token::Purpose;
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ErrorBody, ErrorDomain};

use super::state::AuthState;
use super::storage::{OutboxEmail, find_user_by_email, queue_email, update_password};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{build_token_url, check_password, hash_password, normalize_email, valid_email};
use super::verification::verify_user_token;

/// Email a `FORGOT_PASSWORD` token to the account owning `email`.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Reset email queued"),
        (status = 400, description = "Invalid email", body = ErrorBody),
        (status = 404, description = "No account for this email", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request(ErrorDomain::User, "Invalid email"));
    }

    let Some(user) = find_user_by_email(&pool, &email).await? else {
        return Err(ApiError::not_found(ErrorDomain::User, "User not found"));
    };

    let token = auth_state
        .issue(&user.username, Purpose::ForgotPassword, Utc::now())
        .map_err(anyhow::Error::from)?;
    let link = build_token_url(
        auth_state.config().frontend_base_url(),
        "reset-password",
        &token,
    );
    let message = OutboxEmail::token_email(
        &user.email,
        &user.username,
        &user.first_name,
        Purpose::ForgotPassword,
        &token,
        &link,
    );
    queue_email(&pool, &message).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Replace the password of the account named by a `FORGOT_PASSWORD` token.
///
/// The update bumps `updated_at`: the reset token and every access token
/// issued before it stop working.
#[utoipa::path(
    put,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced"),
        (status = 400, description = "Invalid password", body = ErrorBody),
        (status = 403, description = "Invalid token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    check_password(&request.password, &request.confirm_password)
        .map_err(|message| ApiError::bad_request(ErrorDomain::User, message))?;

    let now = Utc::now();
    let verified = verify_user_token(
        &pool,
        &auth_state,
        &request.token,
        Purpose::ForgotPassword,
        now,
    )
    .await?;

    let password_hash = hash_password(request.password).await?;
    // A concurrent reset with the same token may have won since verification.
    if !update_password(
        &pool,
        verified.user.id,
        &password_hash,
        verified.issued_at_ms,
        now,
    )
    .await?
    {
        return Err(ApiError::invalid_token());
    }
    info!(username = %verified.user.username, "password reset");

    Ok(StatusCode::NO_CONTENT.into_response())
}
