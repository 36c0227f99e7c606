use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::error::DomainError;

/// Problem body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DomainError::ModuleNotFound(_)
            | DomainError::ConfigNotSet(_)
            | DomainError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            DomainError::MiddlewareOwnership { .. } => StatusCode::FORBIDDEN,
            DomainError::DatabaseUnavailable | DomainError::DatabaseWaitTimedOut(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DomainError::ModuleUnresponsive { .. }
            | DomainError::RouteMount { .. }
            | DomainError::StateStore(_)
            | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            title: self
                .status
                .canonical_reason()
                .unwrap_or("Error")
                .to_owned(),
            status: self.status.as_u16(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
