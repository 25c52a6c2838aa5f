use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nesta_core::NestaError;
use serde_json::json;

/// An error rendered as `{"code", "message", "request_id"}`.
///
/// The request id is filled in by [`crate::routes::stamp_request_id`] on the
/// way out, which finds the error in the response extensions.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn to_response(&self, request_id: Option<&str>) -> Response {
        let body = json!({
            "code": self.code,
            "message": self.message,
            "request_id": request_id,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.to_response(None);
        response.extensions_mut().insert(self);
        response
    }
}

impl From<NestaError> for ApiError {
    fn from(err: NestaError) -> Self {
        let message = err.to_string();
        match err {
            NestaError::Validation(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            NestaError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            NestaError::InvalidToken => {
                ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", message)
            }
            NestaError::ExpiredToken => {
                ApiError::new(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", message)
            }
            NestaError::InvalidRefreshToken => {
                ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_REFRESH_TOKEN", message)
            }
            NestaError::RefreshTokenRevoked => {
                ApiError::new(StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_REVOKED", message)
            }
            NestaError::RefreshTokenExpired => {
                ApiError::new(StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_EXPIRED", message)
            }
            NestaError::Forbidden(_) => ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            NestaError::CodeExpired => {
                ApiError::new(StatusCode::BAD_REQUEST, "CODE_EXPIRED", message)
            }
            NestaError::InvalidCode => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_CODE", message)
            }
            NestaError::RateLimited { .. } => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
            }
            NestaError::Blocked { .. } => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "BLOCKED", message)
            }
            NestaError::InsufficientStock { .. } => {
                ApiError::new(StatusCode::CONFLICT, "INSUFFICIENT_STOCK", message)
            }
            NestaError::AlreadyVerified => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_VERIFIED", message)
            }
            NestaError::PendingVerification => {
                ApiError::new(StatusCode::CONFLICT, "PENDING_VERIFICATION", message)
            }
            NestaError::LocationNotActive => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "LOCATION_NOT_ACTIVE", message)
            }
            NestaError::PlanNotActive => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "PLAN_NOT_ACTIVE", message)
            }
            NestaError::Storage(_) | NestaError::Internal(_) => {
                tracing::error!(error = %message, "request failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_errors_do_not_leak_details() {
        let err = ApiError::from(NestaError::Storage("disk I/O error at /var/db".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert!(!err.message.contains("/var/db"));
    }

    #[test]
    fn business_errors_keep_their_code() {
        let err = ApiError::from(NestaError::InsufficientStock {
            product_id: "p1".to_string(),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "INSUFFICIENT_STOCK");
        assert!(err.message.contains("p1"));

        let err = ApiError::from(NestaError::Validation("invalid action".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "VALIDATION_ERROR");
    }
}
