use std::sync::Arc;

use chrono::Utc;
use nesta_core::{
    LedgerStore, NestaError, NestaResult, Order, OrderItem, OrderStatus, Principal,
};
use nesta_crypto::new_id;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub address: serde_json::Value,
    pub comment: Option<String>,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

pub struct OrderLedger<L: LedgerStore> {
    store: Arc<L>,
}

impl<L: LedgerStore> OrderLedger<L> {
    pub fn new(store: Arc<L>) -> Self {
        Self { store }
    }

    /// Price every line at the product's current price and persist the
    /// order with those prices frozen on its items.
    pub async fn create_order(
        &self,
        principal: &Principal,
        input: NewOrder,
    ) -> NestaResult<PlacedOrder> {
        if input.items.is_empty() {
            return Err(NestaError::Validation("order has no items".to_string()));
        }
        if let Some(line) = input.items.iter().find(|line| line.quantity <= 0) {
            return Err(NestaError::Validation(format!(
                "quantity for product {} must be positive",
                line.product_id
            )));
        }

        let order_id = new_id();
        let mut items = Vec::with_capacity(input.items.len());
        let mut total_cents: i64 = 0;
        for line in &input.items {
            let product = self
                .store
                .get_product(&line.product_id)
                .await?
                .ok_or_else(|| NestaError::NotFound(format!("product {}", line.product_id)))?;

            total_cents = product
                .price_cents
                .checked_mul(i64::from(line.quantity))
                .and_then(|line_total| total_cents.checked_add(line_total))
                .ok_or_else(|| NestaError::Validation("order total overflows".to_string()))?;

            items.push(OrderItem {
                id: new_id(),
                order_id: order_id.clone(),
                product_id: product.id,
                quantity: line.quantity,
                price_cents: product.price_cents,
            });
        }

        let order = Order {
            id: order_id,
            user_id: principal.user_id.clone(),
            status: OrderStatus::New,
            address: input.address,
            comment: input.comment.filter(|c| !c.trim().is_empty()),
            total_cents,
            created_at: Utc::now(),
        };
        self.store.create_order(&order, &items).await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            lines = items.len(),
            total_cents,
            "order placed"
        );
        Ok(PlacedOrder { order, items })
    }
}
