use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::services::TokenPair;
use nesta_core::{ProfileUpdate, User};
use crate::state::AppState;
use nesta_core::traits::*;

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub phone: String,
}

#[derive(Serialize)]
pub struct SendCodeResponse {
    pub status: &'static str,
    pub expires_at: DateTime<Utc>,
    /// Surfaced only in development, where there is no SMS gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_code: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub default_address_json: Option<Value>,
}

fn profile_json(user: User) -> Value {
    json!({
        "id": user.id,
        "phone": user.phone,
        "name": user.name,
        "email": user.email,
        "role": user.role,
        "default_address_json": user.default_address,
    })
}

pub async fn send_code<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Json(body): Json<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let issued = state.sessions().send_code(&body.phone).await?;
    let dev_code = state.config.is_development().then_some(issued.code);
    Ok(Json(SendCodeResponse {
        status: "sent",
        expires_at: issued.expires_at,
        dev_code,
    }))
}

pub async fn verify_code<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Json(body): Json<VerifyCodeRequest>,
) -> Result<Json<TokenPair>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let pair = state.sessions().verify_code(&body.phone, &body.code).await?;
    Ok(Json(pair))
}

pub async fn refresh<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let pair = state.sessions().refresh(&body.refresh_token).await?;
    Ok(Json(pair))
}

pub async fn logout<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<Value>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    state.sessions().logout(&body.refresh_token).await?;
    Ok(Json(json!({"status": "logged_out"})))
}

pub async fn me<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<Value>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let user = state.sessions().current_user(&principal).await?;
    Ok(Json(profile_json(user)))
}

pub async fn update_me<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let update = ProfileUpdate {
        name: body.name,
        email: body.email,
        default_address: body.default_address_json,
    };
    let user = state.sessions().update_profile(&principal, update).await?;
    Ok(Json(profile_json(user)))
}
