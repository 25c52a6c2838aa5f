use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use nesta_core::{InterestRequest, Location};
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;
use nesta_core::traits::*;

#[derive(Deserialize)]
pub struct InterestRequestBody {
    pub phone: String,
}

pub async fn create_request<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Path(complex_id): Path<String>,
    Json(body): Json<InterestRequestBody>,
) -> Result<(StatusCode, Json<InterestRequest>), ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let request = state
        .thresholds()
        .create_interest_request(&complex_id, &body.phone)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn verify_request<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(request_id): Path<String>,
) -> Result<Json<Location>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let location = state
        .thresholds()
        .verify_request(&principal, &request_id)
        .await?;
    Ok(Json(location))
}
