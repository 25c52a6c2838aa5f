use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use nesta_core::{NestaError, NestaResult, Role};
use serde::{Deserialize, Serialize};

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn new(
        subject: &str,
        role: Role,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        token_id: &str,
    ) -> Self {
        Self {
            sub: subject.to_string(),
            role,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: token_id.to_string(),
        }
    }
}

/// Sign claims into a compact `header.claims.signature` token (HS256).
pub fn issue_token(claims: &Claims, secret: &str) -> NestaResult<String> {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|e| NestaError::Internal(format!("token signing failed: {e}")))
}

/// Verify a token's signature and expiry and return its claims.
///
/// The signature check is constant-time. No clock leeway is applied: a token
/// is rejected as soon as the current time passes `exp`.
pub fn verify_token(token: &str, secret: &str) -> NestaResult<Claims> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);
    let token_data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => NestaError::ExpiredToken,
        _ => NestaError::InvalidToken,
    })?;
    Ok(token_data.claims)
}
