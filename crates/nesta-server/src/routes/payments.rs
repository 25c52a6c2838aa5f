use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use nesta_core::{Payment, PaymentKind, PaymentStatus, SettlementOutcome};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::services::{InitPayment, WebhookEvent};
use crate::state::AppState;
use nesta_core::traits::*;

#[derive(Deserialize)]
pub struct InitPaymentRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub entity_id: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub amount_cents: i64,
}

#[derive(Deserialize)]
pub struct WebhookRequest {
    pub provider_payment_id: String,
    pub status: String,
    #[serde(default)]
    pub payload: Value,
}

pub async fn init_payment<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(body): Json<InitPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let kind: PaymentKind = body.kind.trim().parse()?;
    let payment = state
        .settlements()
        .init_payment(
            &principal,
            InitPayment {
                kind,
                entity_id: body.entity_id,
                provider: body.provider,
                provider_payment_id: body.provider_payment_id,
                amount_cents: body.amount_cents,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Provider callback. Statuses are uppercased first; one outside the known
/// set is recorded on the payment without side effects.
pub async fn webhook<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    Path(provider): Path<String>,
    Json(body): Json<WebhookRequest>,
) -> Result<Json<Value>, ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let status: PaymentStatus = body.status.trim().to_ascii_uppercase().parse()?;
    let outcome = state
        .settlements()
        .handle_webhook(WebhookEvent {
            provider,
            provider_payment_id: body.provider_payment_id,
            status,
            payload: body.payload,
        })
        .await?;

    let applied = outcome == SettlementOutcome::Applied;
    Ok(Json(json!({"status": "ok", "applied": applied})))
}
