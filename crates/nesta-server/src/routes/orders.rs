use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::services::{NewOrder, OrderLine, PlacedOrder};
use crate::state::AppState;
use nesta_core::traits::*;

#[derive(Deserialize)]
pub struct OrderItemInput {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
    #[serde(rename = "address_json", default)]
    pub address: serde_json::Value,
    pub comment: Option<String>,
}

pub async fn create_order<C, L, G>(
    State(state): State<AppState<C, L, G>>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), ApiError>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    let input = NewOrder {
        address: body.address,
        comment: body.comment,
        items: body
            .items
            .into_iter()
            .map(|item| OrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect(),
    };
    let placed = state.orders().create_order(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}
