//! Department CRUD.
//!
//! Departments are independent of the account model. Reads need any signed-in
//! user; writes need `ADMIN`.

mod storage;
pub(crate) mod types;

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::auth::{AuthState, Role, require_auth};
use crate::api::error::{ApiError, ErrorBody, ErrorDomain};
use types::{Department, DepartmentPage, DepartmentRequest, MAX_NAME_LEN, PAGE_SIZE, PageQuery};

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::bad_request(ErrorDomain::Global, "Invalid department id"))
}

fn validate_name(payload: Result<Json<DepartmentRequest>, JsonRejection>) -> Result<String, ApiError> {
    let Json(request) = payload?;
    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(
            ErrorDomain::Global,
            format!("Department name must be 1-{MAX_NAME_LEN} characters long"),
        ));
    }
    Ok(name.to_string())
}

fn not_found() -> ApiError {
    ApiError::not_found(ErrorDomain::Global, "Department not found")
}

async fn require_admin(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<(), ApiError> {
    require_auth(headers, pool, auth_state)
        .await?
        .require_role(Role::Admin)
}

#[utoipa::path(
    get,
    path = "/v1/departments",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of departments", body = DepartmentPage),
        (status = 400, description = "Page below 1", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "departments"
)]
pub async fn list_departments(
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &pool, &auth_state).await?;
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::bad_request(
            ErrorDomain::Global,
            "Page must be 1 or greater",
        ));
    }
    let (items, total) = storage::list_page(&pool, page).await?;
    Ok((
        StatusCode::OK,
        Json(DepartmentPage {
            items,
            page,
            page_size: PAGE_SIZE,
            total,
        }),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/v1/departments/{id}",
    params(("id" = i64, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department", body = Department),
        (status = 400, description = "Invalid id", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 404, description = "Department not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "departments"
)]
pub async fn get_department(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    require_auth(&headers, &pool, &auth_state).await?;
    let id = parse_id(&id)?;
    let department = storage::find(&pool, id).await?.ok_or_else(not_found)?;
    Ok((StatusCode::OK, Json(department)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/departments",
    request_body = DepartmentRequest,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 400, description = "Invalid name", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "departments"
)]
pub async fn create_department(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<DepartmentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &pool, &auth_state).await?;
    let name = validate_name(payload)?;
    let department = storage::insert(&pool, &name, Utc::now()).await?;
    info!(id = department.id, "department created");
    Ok((
        StatusCode::CREATED,
        [(LOCATION, format!("/v1/departments/{}", department.id))],
        Json(department),
    )
        .into_response())
}

#[utoipa::path(
    put,
    path = "/v1/departments/{id}",
    params(("id" = i64, Path, description = "Department id")),
    request_body = DepartmentRequest,
    responses(
        (status = 200, description = "Department updated", body = Department),
        (status = 400, description = "Invalid id or name", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody),
        (status = 404, description = "Department not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "departments"
)]
pub async fn update_department(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<DepartmentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &pool, &auth_state).await?;
    let id = parse_id(&id)?;
    let name = validate_name(payload)?;
    let department = storage::update(&pool, id, &name, Utc::now())
        .await?
        .ok_or_else(not_found)?;
    Ok((StatusCode::OK, Json(department)).into_response())
}

#[utoipa::path(
    delete,
    path = "/v1/departments/{id}",
    params(("id" = i64, Path, description = "Department id")),
    responses(
        (status = 204, description = "Department deleted"),
        (status = 400, description = "Invalid id", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "ADMIN role required", body = ErrorBody),
        (status = 404, description = "Department not found", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "departments"
)]
pub async fn delete_department(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &pool, &auth_state).await?;
    let id = parse_id(&id)?;
    if !storage::delete(&pool, id).await? {
        return Err(not_found());
    }
    info!(id, "department deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
