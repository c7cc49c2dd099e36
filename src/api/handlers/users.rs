//! Read-only user endpoints for any signed-in user.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;

use super::auth::{
    AuthState, require_auth,
    storage::{find_user_by_username, list_users as fetch_users},
    types::UserView,
};
use crate::api::error::{ApiError, ErrorBody, ErrorDomain};

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "All users ordered by username", body = [UserView]),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &pool, &auth_state).await?;
    let users: Vec<UserView> = fetch_users(&pool)
        .await?
        .iter()
        .map(|user| user.view())
        .collect();
    Ok((StatusCode::OK, Json(users)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/users/{username}",
    params(
        ("username" = String, Path, description = "Username")
    ),
    responses(
        (status = 200, description = "User detail", body = UserView),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    Path(username): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &pool, &auth_state).await?;
    match find_user_by_username(&pool, username.trim()).await? {
        Some(user) => Ok((StatusCode::OK, Json(user.view())).into_response()),
        None => Err(ApiError::not_found(ErrorDomain::User, "User not found")),
    }
}
