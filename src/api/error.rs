//! API error type shared by all handlers.
//!
//! Every error renders as `{timestamp, status, error, domain, message}` where
//! `domain` tells the client which area rejected the request.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDomain {
    Global,
    User,
    Auth,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub domain: ErrorDomain,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        domain: ErrorDomain,
        message: String,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    Forbidden {
        domain: ErrorDomain,
        message: String,
    },
    #[error("{message}")]
    NotFound {
        domain: ErrorDomain,
        message: String,
    },
    #[error("{message}")]
    Conflict {
        domain: ErrorDomain,
        message: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::BadRequest {
            domain,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::Forbidden {
            domain,
            message: message.into(),
        }
    }

    pub fn not_found(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::NotFound {
            domain,
            message: message.into(),
        }
    }

    pub fn conflict(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::Conflict {
            domain,
            message: message.into(),
        }
    }

    /// Uniform rejection for emailed tokens that fail any check.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::forbidden(ErrorDomain::Auth, "Invalid token")
    }

    /// Rejection for a request that carries no JSON body.
    #[must_use]
    pub fn missing_payload() -> Self {
        Self::bad_request(ErrorDomain::Global, "Missing payload")
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn domain(&self) -> ErrorDomain {
        match self {
            Self::BadRequest { domain, .. }
            | Self::Forbidden { domain, .. }
            | Self::NotFound { domain, .. }
            | Self::Conflict { domain, .. } => *domain,
            Self::Unauthorized(_) => ErrorDomain::Auth,
            Self::Internal(_) => ErrorDomain::Global,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

/// Body extraction failures keep the JSON error shape instead of axum's text.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {rejection}");
        match rejection {
            JsonRejection::MissingJsonContentType(_) => Self::missing_payload(),
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                Self::bad_request(ErrorDomain::Global, "Malformed JSON payload")
            }
            _ => Self::bad_request(ErrorDomain::Global, "Unreadable payload"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("Request failed: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            domain: self.domain(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result, anyhow};
    use http_body_util::BodyExt;

    async fn body_json(error: ApiError) -> Result<(StatusCode, serde_json::Value)> {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn renders_status_domain_and_message() -> Result<()> {
        let (status, body) =
            body_json(ApiError::conflict(ErrorDomain::User, "Username already taken")).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], 409);
        assert_eq!(body["error"], "Conflict");
        assert_eq!(body["domain"], "user");
        assert_eq!(body["message"], "Username already taken");
        assert!(body["timestamp"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_hide_details() -> Result<()> {
        let (status, body) = body_json(ApiError::from(anyhow!("password=hunter2"))).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["domain"], "global");
        let message = body["message"].as_str().context("missing message")?;
        assert!(!message.contains("hunter2"));
        Ok(())
    }

    #[tokio::test]
    async fn json_rejections_render_as_api_errors() -> Result<()> {
        use axum::{body::Body, extract::FromRequest, http::Request};

        #[derive(Debug, serde::Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }

        let request = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from("{\"name\": "))?;
        let rejection = Json::<Named>::from_request(request, &())
            .await
            .err()
            .context("truncated body was accepted")?;
        let (status, body) = body_json(ApiError::from(rejection)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["domain"], "global");
        assert_eq!(body["message"], "Malformed JSON payload");

        let request = Request::builder().body(Body::from("{\"name\":\"x\"}"))?;
        let rejection = Json::<Named>::from_request(request, &())
            .await
            .err()
            .context("body without content type was accepted")?;
        let (_, body) = body_json(ApiError::from(rejection)).await?;
        assert_eq!(body["message"], "Missing payload");
        Ok(())
    }

    #[test]
    fn invalid_token_is_forbidden_in_auth_domain() {
        let error = ApiError::invalid_token();
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.domain(), ErrorDomain::Auth);
    }

    #[test]
    fn unauthorized_is_auth_domain() {
        let error = ApiError::unauthorized("Missing bearer token");
        assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.domain(), ErrorDomain::Auth);
    }
}
