use axum::Extension;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use nesta_core::Principal;

use crate::error::ApiError;

/// The access-token signing secret, added as an Axum Extension.
#[derive(Clone)]
pub struct JwtSecret(pub String);

/// The caller decoded from a valid `Authorization: Bearer` access token.
///
/// Handlers take this explicitly and pass the inner [`Principal`] on to the
/// services; nothing reads identity from ambient request state.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(jwt_secret) = Extension::<JwtSecret>::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "JWT secret not configured",
                )
            })?;

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("invalid authorization format"))?;

        let claims = nesta_crypto::verify_token(token, &jwt_secret.0)?;

        Ok(AuthenticatedUser(Principal {
            user_id: claims.sub,
            role: claims.role,
        }))
    }
}
