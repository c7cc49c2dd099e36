//! Account management for administrators.
//!
//! Every operation takes a list of usernames, acts on the accounts that exist
//! and answers `204`. The caller must hold the `ADMIN` role.

mod storage;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::auth::{AuthState, Role, require_auth};
use crate::api::error::{ApiError, ErrorBody, ErrorDomain};
use storage::AccountFlag;

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct UsernamesRequest {
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ChangeRoleRequest {
    pub usernames: Vec<String>,
    pub role_names: Vec<String>,
}

/// Trim, drop blanks and dedupe; an empty result is a `400`.
fn usernames(raw: &[String]) -> Result<Vec<String>, ApiError> {
    let mut names: Vec<String> = raw
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect();
    names.sort();
    names.dedup();
    if names.is_empty() {
        return Err(ApiError::bad_request(
            ErrorDomain::User,
            "At least one username is required",
        ));
    }
    Ok(names)
}

fn roles(raw: &[String]) -> Result<Vec<Role>, ApiError> {
    let mut roles = Vec::with_capacity(raw.len());
    for name in raw {
        let role = name.parse::<Role>().map_err(|_| {
            ApiError::bad_request(ErrorDomain::User, format!("Unknown role: {}", name.trim()))
        })?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if roles.is_empty() {
        return Err(ApiError::bad_request(
            ErrorDomain::User,
            "At least one role is required",
        ));
    }
    Ok(roles)
}

async fn require_admin(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<String, ApiError> {
    let principal = require_auth(headers, pool, auth_state).await?;
    principal.require_role(Role::Admin)?;
    Ok(principal.username)
}

async fn set_flag(
    headers: HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
    flag: AccountFlag,
    value: bool,
) -> Result<Response, ApiError> {
    let admin = require_admin(&headers, pool, auth_state).await?;
    let Json(request) = payload?;
    let names = usernames(&request.usernames)?;
    let touched = storage::set_flag(pool, &names, flag, value, Utc::now()).await?;
    info!(%admin, ?flag, value, touched, "admin updated account flag");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/logout",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Tokens of the listed users revoked"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn logout_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let admin = require_admin(&headers, &pool, &auth_state).await?;
    let Json(request) = payload?;
    let names = usernames(&request.usernames)?;
    let touched = storage::force_logout(&pool, &names, Utc::now()).await?;
    info!(%admin, touched, "admin forced logout");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/role",
    request_body = ChangeRoleRequest,
    responses(
        (status = 204, description = "Role set replaced"),
        (status = 400, description = "Empty username list or invalid roles", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn change_role(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ChangeRoleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let admin = require_admin(&headers, &pool, &auth_state).await?;
    let Json(request) = payload?;
    let names = usernames(&request.usernames)?;
    let roles = roles(&request.role_names)?;
    let touched = storage::replace_roles(&pool, &names, &roles, Utc::now()).await?;
    info!(%admin, ?roles, touched, "admin changed roles");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/lock",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Accounts locked"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn lock_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    set_flag(headers, &pool, &auth_state, payload, AccountFlag::NonLocked, false).await
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/unlock",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Accounts unlocked"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn unlock_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    set_flag(headers, &pool, &auth_state, payload, AccountFlag::NonLocked, true).await
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/activate",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Accounts activated"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn activate_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    set_flag(headers, &pool, &auth_state, payload, AccountFlag::Activated, true).await
}

#[utoipa::path(
    put,
    path = "/v1/admin/users/deactivate",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Accounts deactivated"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn deactivate_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    set_flag(headers, &pool, &auth_state, payload, AccountFlag::Activated, false).await
}

#[utoipa::path(
    delete,
    path = "/v1/admin/users",
    request_body = UsernamesRequest,
    responses(
        (status = 204, description = "Accounts deleted"),
        (status = 400, description = "Empty username list", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn delete_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UsernamesRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let admin = require_admin(&headers, &pool, &auth_state).await?;
    let Json(request) = payload?;
    let names = usernames(&request.usernames)?;
    let deleted = storage::delete_users(&pool, &names).await?;
    info!(%admin, deleted, "admin deleted users");
    Ok(StatusCode::NO_CONTENT.into_response())
}
