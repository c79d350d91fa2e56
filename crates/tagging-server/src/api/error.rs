//! API Errors
//!
//! Maps tagging failures onto HTTP status codes:
//! 400 validation, 404 unknown tag, 409 partial delete or conflicting job,
//! 500 store failures, 502 registry failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tagging_core::TaggingError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Tagging(#[from] TaggingError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    /// An internal actor or task is gone
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Tagging(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Tagging(e) => match e {
                TaggingError::NotFound { .. } => StatusCode::NOT_FOUND,
                TaggingError::PartialDelete { .. } => StatusCode::CONFLICT,
                TaggingError::Registry(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Re-sending the same request is expected to converge.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tagging(e) => e.is_retryable(),
            Self::Unavailable(_) => true,
            Self::BadRequest(_) | Self::Conflict(_) => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                retryable = self.is_retryable(),
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tagging_core::{RegistryError, StoreError};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(TaggingError::not_found("promo")), StatusCode::NOT_FOUND),
            (ApiError::from(TaggingError::EmptyBatch), StatusCode::BAD_REQUEST),
            (
                ApiError::from(TaggingError::BatchTooLarge { size: 51, max: 50 }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(TaggingError::PartialDelete {
                    tag_id: "promo".to_string(),
                    buckets_deleted: 1,
                    buckets_total: 3,
                    members_removed: 4,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(TaggingError::Store(StoreError::Unavailable("down".to_string()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::from(TaggingError::Registry(RegistryError::Transport("refused".to_string()))),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::Conflict("busy".to_string()), StatusCode::CONFLICT),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error}");
        }
    }

    #[test]
    fn test_retryable_failures() {
        let store_down = ApiError::from(TaggingError::Store(StoreError::Unavailable("down".to_string())));
        assert!(store_down.is_retryable());
        assert!(ApiError::Unavailable("actor gone".to_string()).is_retryable());
        assert!(!ApiError::from(TaggingError::EmptyBatch).is_retryable());
        assert!(!ApiError::from(TaggingError::not_found("promo")).is_retryable());
    }
}
