//! Error envelope and the mapping from the error taxonomy onto HTTP status codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use bastion_core::{BastionError, ErrorKind};

use crate::dto::{ApiResponse, ErrorBody};

/// An error ready to be rendered as `{"success": false, "data": null, "error": {...}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported-media-type", message)
    }

    pub fn malformed_entity(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "malformed-entity", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::FailedPrecondition => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BastionError> for ApiError {
    fn from(err: BastionError) -> Self {
        let kind = err.kind();
        match kind {
            ErrorKind::Internal => error!(error = ?err, "request failed"),
            ErrorKind::DeadlineExceeded => warn!(error = %err, "request deadline exceeded"),
            _ => {}
        }
        Self::new(status_for(kind), kind.as_str(), err.public_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code,
                message: self.message,
            }),
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_status() {
        let cases = [
            (BastionError::invalid_argument("x"), 400),
            (BastionError::unauthenticated("x"), 401),
            (BastionError::permission_denied("view", "domain"), 403),
            (BastionError::not_found("domain", "d"), 404),
            (BastionError::conflict("x"), 409),
            (BastionError::failed_precondition("x"), 422),
            (BastionError::deadline_exceeded("check"), 504),
            (BastionError::internal("x"), 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status.as_u16(), status);
        }
    }

    #[test]
    fn test_internal_message_is_redacted() {
        let err = ApiError::from(BastionError::internal("connection refused on 10.0.0.4"));
        assert_eq!(err.code, "internal");
        assert!(!err.message.contains("10.0.0.4"));
    }
}
