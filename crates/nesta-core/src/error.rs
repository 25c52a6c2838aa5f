use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NestaError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token revoked")]
    RefreshTokenRevoked,

    #[error("refresh token expired")]
    RefreshTokenExpired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("one-time code expired")]
    CodeExpired,

    #[error("invalid code")]
    InvalidCode,

    #[error("rate limited until {retry_at}")]
    RateLimited { retry_at: DateTime<Utc> },

    #[error("blocked until {until}")]
    Blocked { until: DateTime<Utc> },

    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: String },

    #[error("request already verified")]
    AlreadyVerified,

    #[error("request pending verification")]
    PendingVerification,

    #[error("location is not active")]
    LocationNotActive,

    #[error("plan is not active")]
    PlanNotActive,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type NestaResult<T> = Result<T, NestaError>;
