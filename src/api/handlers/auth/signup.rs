//! Account registration.

use auth_token::Purpose;
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ErrorBody, ErrorDomain};

use super::state::AuthState;
use super::storage::{NewUser, OutboxEmail, SignupOutcome, insert_user};
use super::types::{SignUpRequest, UserView};
use super::utils::{
    build_token_url, check_password, hash_password, normalize_email, valid_email, valid_name,
    valid_username,
};

/// Validated sign-up input with the email normalized.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct SignUpInput {
    pub(super) first_name: String,
    pub(super) last_name: String,
    pub(super) username: String,
    pub(super) email: String,
}

pub(super) fn validate_sign_up(request: &SignUpRequest) -> Result<SignUpInput, ApiError> {
    let first_name = request.first_name.trim();
    let last_name = request.last_name.trim();
    let username = request.username.trim();
    let email = normalize_email(&request.email);

    if !valid_name(first_name) {
        return Err(ApiError::bad_request(
            ErrorDomain::User,
            "First name must be 1-50 letters",
        ));
    }
    if !valid_name(last_name) {
        return Err(ApiError::bad_request(
            ErrorDomain::User,
            "Last name must be 1-50 letters",
        ));
    }
    if !valid_username(username) {
        return Err(ApiError::bad_request(
            ErrorDomain::User,
            "Username must be 3-20 characters of letters, digits, '.', '_' or '-'",
        ));
    }
    if !valid_email(&email) {
        return Err(ApiError::bad_request(ErrorDomain::User, "Invalid email"));
    }
    check_password(&request.password, &request.confirm_password)
        .map_err(|message| ApiError::bad_request(ErrorDomain::User, message))?;

    Ok(SignUpInput {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        username: username.to_string(),
        email,
    })
}

/// Register an inactive account and queue its confirmation email.
#[utoipa::path(
    post,
    path = "/v1/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created; confirmation email queued", body = UserView),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Username or email already registered", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn sign_up(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let input = validate_sign_up(&request)?;

    let now = Utc::now();
    let token = auth_state
        .issue(&input.username, Purpose::ConfirmRegistration, now)
        .map_err(anyhow::Error::from)?;
    let link = build_token_url(
        auth_state.config().frontend_base_url(),
        "confirm-registration",
        &token,
    );
    let confirmation = OutboxEmail::token_email(
        &input.email,
        &input.username,
        &input.first_name,
        Purpose::ConfirmRegistration,
        &token,
        &link,
    );

    let password_hash = hash_password(request.password).await?;
    let new_user = NewUser {
        first_name: input.first_name,
        last_name: input.last_name,
        username: input.username,
        email: input.email,
        password_hash,
    };

    match insert_user(&pool, &new_user, &confirmation, now).await? {
        SignupOutcome::Created(user) => {
            info!(username = %user.username, "user registered");
            let location = HeaderValue::from_str(&format!("/v1/users/{}", user.username))
                .map_err(anyhow::Error::from)?;
            Ok((
                StatusCode::CREATED,
                [(LOCATION, location)],
                Json(user.view()),
            )
                .into_response())
        }
        SignupOutcome::UsernameTaken => Err(ApiError::conflict(
            ErrorDomain::User,
            "Username already taken",
        )),
        SignupOutcome::EmailTaken => Err(ApiError::conflict(
            ErrorDomain::User,
            "Email already registered",
        )),
    }
}
