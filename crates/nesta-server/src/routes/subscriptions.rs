use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use nesta_core::Subscription;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::services::{NewSubscription, SubscriptionAction};
use crate::state::AppState;
use nesta_core::traits::*;

#[derive(Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    pub complex_id: String,
    #[serde(rename = "address_json", default)]
    pub address: serde_json::Value,
    pub time_window: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

pub async fn create_subscription<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let created = state
        .subscriptions()
        .create_subscription(
            &principal,
            NewSubscription {
                complex_id: body.complex_id,
                plan_id: body.plan_id,
                address: body.address,
                time_window: body.time_window,
                instructions: body.instructions,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "subscription": created.subscription,
            "payment_required": created.requires_payment,
        })),
    ))
}

pub async fn update_subscription<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<ActionRequest>,
) -> Result<Json<Subscription>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let action: SubscriptionAction = body.action.trim().parse()?;
    let subscription = state
        .subscriptions()
        .update_subscription(&principal, &id, action)
        .await?;
    Ok(Json(subscription))
}
