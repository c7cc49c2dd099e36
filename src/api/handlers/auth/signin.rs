//! Sign-in and endpoints for the signed-in user.

use auth_token::Purpose;
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ErrorBody, ErrorDomain};

use super::principal::require_auth;
use super::state::AuthState;
use super::storage::{find_user_by_login, find_user_by_username, logout_from_all_devices};
use super::types::{SignInRequest, SignInResponse, UserView};
use super::utils::{normalize_email, verify_password};

/// Exchange credentials for an `ACCESS_RESOURCES` token.
///
/// The password is checked before account state so that a wrong password never
/// reveals whether an account is locked or inactive.
#[utoipa::path(
    post,
    path = "/v1/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = SignInResponse),
        (status = 401, description = "Bad credentials", body = ErrorBody),
        (status = 403, description = "Account not activated or locked", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn sign_in(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let login = request.username.trim();
    if login.is_empty() || request.password.is_empty() {
        return Err(ApiError::unauthorized("Bad credentials"));
    }

    let Some(user) = find_user_by_login(&pool, login, &normalize_email(login)).await? else {
        return Err(ApiError::unauthorized("Bad credentials"));
    };
    if !verify_password(request.password, user.password_hash.clone()).await? {
        return Err(ApiError::unauthorized("Bad credentials"));
    }
    if !user.activated {
        return Err(ApiError::forbidden(
            ErrorDomain::Auth,
            "Account is not activated",
        ));
    }
    if !user.non_locked {
        return Err(ApiError::forbidden(ErrorDomain::Auth, "Account is locked"));
    }

    let token = auth_state
        .issue(&user.username, Purpose::AccessResources, Utc::now())
        .map_err(anyhow::Error::from)?;
    info!(username = %user.username, "user signed in");

    Ok((
        StatusCode::OK,
        Json(SignInResponse {
            token,
            user: user.view(),
        }),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/signed-in-user",
    responses(
        (status = 200, description = "The authenticated user", body = UserView),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn signed_in_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    let Some(user) = find_user_by_username(&pool, &principal.username).await? else {
        return Err(ApiError::unauthorized("Invalid access token"));
    };
    Ok((StatusCode::OK, Json(user.view())).into_response())
}

/// Invalidate every token previously issued to the caller.
#[utoipa::path(
    post,
    path = "/v1/auth/logout-from-all-devices",
    responses(
        (status = 204, description = "All earlier tokens revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout_everywhere(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    logout_from_all_devices(&pool, principal.user_id, Utc::now()).await?;
    info!(username = %principal.username, "logged out from all devices");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::rejection::MissingJsonContentType;
    use crate::api::handlers::auth::AuthConfig;
    use anyhow::Result;
    use auth_token::TokenKeys;
    use sqlx::postgres::PgPoolOptions;

    fn missing_body<T>() -> Result<Json<T>, JsonRejection> {
        Err(MissingJsonContentType::default().into())
    }

    fn auth_state() -> Result<Arc<AuthState>> {
        Ok(Arc::new(AuthState::new(
            AuthConfig::new("https://warden.dev".to_string()),
            TokenKeys::from_secret(b"signin-test-secret-0123456789abcdef", "warden")?,
        )))
    }

    #[tokio::test]
    async fn sign_in_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = sign_in(Extension(pool), Extension(auth_state()?), missing_body())
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn sign_in_blank_credentials_are_unauthorized() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = sign_in(
            Extension(pool),
            Extension(auth_state()?),
            Ok(Json(SignInRequest {
                username: " ".to_string(),
                password: String::new(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn signed_in_user_requires_bearer() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = signed_in_user(HeaderMap::new(), Extension(pool), Extension(auth_state()?))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn logout_everywhere_requires_bearer() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response =
            logout_everywhere(HeaderMap::new(), Extension(pool), Extension(auth_state()?))
                .await
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
