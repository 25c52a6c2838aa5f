use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use nesta_core::{
    LedgerStore, NestaError, NestaResult, Order, OrderItem, OrderStatus, Payment, PaymentKind,
    PaymentStatus, Plan, Product, Settlement, SettlementOutcome, Subscription,
    SubscriptionStatus,
};

use crate::{insert_err, parse_column, storage_err};

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

const PRODUCT_SELECT: &str =
    "SELECT id, title, price_cents, stock, category, is_active FROM products";

const ORDER_SELECT: &str =
    "SELECT id, user_id, status, address_json, comment, total_cents, created_at FROM orders";

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT id, user_id, complex_id, plan_id, status, address_json, time_window, instructions,
           current_period_start, current_period_end, created_at
    FROM subscriptions
"#;

const PAYMENT_SELECT: &str = r#"
    SELECT id, type, entity_id, provider, provider_payment_id, status, amount_cents,
           payload_json, created_at
    FROM payments
"#;

fn row_to_product(row: &sqlx::postgres::PgRow) -> Result<Product, NestaError> {
    Ok(Product {
        id: row.try_get("id").map_err(storage_err)?,
        title: row.try_get("title").map_err(storage_err)?,
        price_cents: row.try_get("price_cents").map_err(storage_err)?,
        stock: row.try_get("stock").map_err(storage_err)?,
        category: row.try_get("category").map_err(storage_err)?,
        is_active: row.try_get("is_active").map_err(storage_err)?,
    })
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, NestaError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let Json(address): Json<serde_json::Value> =
        row.try_get("address_json").map_err(storage_err)?;

    Ok(Order {
        id: row.try_get("id").map_err(storage_err)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        address,
        comment: row.try_get("comment").map_err(storage_err)?,
        total_cents: row.try_get("total_cents").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, NestaError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let Json(address): Json<serde_json::Value> =
        row.try_get("address_json").map_err(storage_err)?;

    Ok(Subscription {
        id: row.try_get("id").map_err(storage_err)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        complex_id: row.try_get("complex_id").map_err(storage_err)?,
        plan_id: row.try_get("plan_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        address,
        time_window: row.try_get("time_window").map_err(storage_err)?,
        instructions: row.try_get("instructions").map_err(storage_err)?,
        current_period_start: row.try_get("current_period_start").map_err(storage_err)?,
        current_period_end: row.try_get("current_period_end").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, NestaError> {
    let kind: String = row.try_get("type").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let payload: Option<Json<serde_json::Value>> =
        row.try_get("payload_json").map_err(storage_err)?;

    Ok(Payment {
        id: row.try_get("id").map_err(storage_err)?,
        kind: parse_column(&kind)?,
        entity_id: row.try_get("entity_id").map_err(storage_err)?,
        provider: row.try_get("provider").map_err(storage_err)?,
        provider_payment_id: row.try_get("provider_payment_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        amount_cents: row.try_get("amount_cents").map_err(storage_err)?,
        payload: payload.map(|Json(v)| v),
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn create_product(&self, product: &Product) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO products (id, title, price_cents, stock, category, is_active)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&product.id)
        .bind(&product.title)
        .bind(product.price_cents)
        .bind(product.stock)
        .bind(&product.category)
        .bind(product.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "product"))?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> NestaResult<()> {
        let result = sqlx::query(
            "UPDATE products SET title = $1, price_cents = $2, stock = $3, category = $4, is_active = $5
             WHERE id = $6",
        )
        .bind(&product.title)
        .bind(product.price_cents)
        .bind(product.stock)
        .bind(&product.category)
        .bind(product.is_active)
        .bind(&product.id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(NestaError::NotFound(format!("product {}", product.id)));
        }
        Ok(())
    }

    async fn get_product(&self, id: &str) -> NestaResult<Option<Product>> {
        let row = sqlx::query(&format!("{PRODUCT_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_product).transpose()
    }

    async fn create_plan(&self, plan: &Plan) -> NestaResult<()> {
        sqlx::query("INSERT INTO plans (id, name, price_cents, is_active) VALUES ($1, $2, $3, $4)")
            .bind(&plan.id)
            .bind(&plan.name)
            .bind(plan.price_cents)
            .bind(plan.is_active)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_err(e, "plan"))?;
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> NestaResult<Option<Plan>> {
        let row = sqlx::query("SELECT id, name, price_cents, is_active FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(r) => Ok(Some(Plan {
                id: r.try_get("id").map_err(storage_err)?,
                name: r.try_get("name").map_err(storage_err)?,
                price_cents: r.try_get("price_cents").map_err(storage_err)?,
                is_active: r.try_get("is_active").map_err(storage_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn create_order(&self, order: &Order, items: &[OrderItem]) -> NestaResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, status, address_json, comment, total_cents, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(Json(&order.address))
        .bind(&order.comment)
        .bind(order.total_cents)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, price_cents, position)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.price_cents)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> NestaResult<Option<Order>> {
        let row = sqlx::query(&format!("{ORDER_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn get_order_items(&self, order_id: &str) -> NestaResult<Vec<OrderItem>> {
        let rows = sqlx::query(
            "SELECT id, order_id, product_id, quantity, price_cents FROM order_items
             WHERE order_id = $1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                Ok(OrderItem {
                    id: r.try_get("id").map_err(storage_err)?,
                    order_id: r.try_get("order_id").map_err(storage_err)?,
                    product_id: r.try_get("product_id").map_err(storage_err)?,
                    quantity: r.try_get("quantity").map_err(storage_err)?,
                    price_cents: r.try_get("price_cents").map_err(storage_err)?,
                })
            })
            .collect()
    }

    async fn create_subscription(&self, subscription: &Subscription) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO subscriptions (
                id, user_id, complex_id, plan_id, status, address_json, time_window, instructions,
                current_period_start, current_period_end, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.complex_id)
        .bind(&subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(Json(&subscription.address))
        .bind(&subscription.time_window)
        .bind(&subscription.instructions)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> NestaResult<Option<Subscription>> {
        let row = sqlx::query(&format!("{SUBSCRIPTION_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn update_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> NestaResult<()> {
        let result = sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(NestaError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    async fn create_payment(&self, payment: &Payment) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO payments (
                id, type, entity_id, provider, provider_payment_id, status, amount_cents,
                payload_json, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&payment.id)
        .bind(payment.kind.as_str())
        .bind(&payment.entity_id)
        .bind(&payment.provider)
        .bind(&payment.provider_payment_id)
        .bind(payment.status.as_str())
        .bind(payment.amount_cents)
        .bind(payment.payload.as_ref().map(Json))
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "payment"))?;
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> NestaResult<Option<Payment>> {
        let row = sqlx::query(&format!("{PAYMENT_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn get_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> NestaResult<Option<Payment>> {
        let row = sqlx::query(&format!(
            "{PAYMENT_SELECT} WHERE provider = $1 AND provider_payment_id = $2"
        ))
        .bind(provider)
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn settle_payment(&self, settlement: &Settlement) -> NestaResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // The UPDATE holds the payment row lock until commit; a concurrent
        // duplicate re-checks the predicate after we commit and matches nothing.
        let updated = sqlx::query(
            "UPDATE payments SET status = $1, payload_json = $2 WHERE id = $3 AND status <> $1",
        )
        .bind(settlement.status.as_str())
        .bind(Json(&settlement.payload))
        .bind(&settlement.payment_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if updated == 0 {
            let exists = sqlx::query("SELECT 1 FROM payments WHERE id = $1")
                .bind(&settlement.payment_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
            return match exists {
                Some(_) => Ok(SettlementOutcome::AlreadyApplied),
                None => Err(NestaError::NotFound(format!(
                    "payment {}",
                    settlement.payment_id
                ))),
            };
        }

        if settlement.status == PaymentStatus::Paid {
            match settlement.kind {
                PaymentKind::Order => {
                    let flipped = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
                        .bind(OrderStatus::Paid.as_str())
                        .bind(&settlement.entity_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?
                        .rows_affected();
                    if flipped == 0 {
                        return Err(NestaError::NotFound(format!(
                            "order {}",
                            settlement.entity_id
                        )));
                    }

                    // Lock every product the order touches, in id order, so two
                    // settlements sharing products cannot deadlock.
                    sqlx::query(
                        "SELECT id FROM products
                         WHERE id IN (SELECT product_id FROM order_items WHERE order_id = $1)
                         ORDER BY id
                         FOR UPDATE",
                    )
                    .bind(&settlement.entity_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(storage_err)?;

                    let items = sqlx::query(
                        "SELECT product_id, quantity FROM order_items WHERE order_id = $1 ORDER BY product_id",
                    )
                    .bind(&settlement.entity_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(storage_err)?;

                    for item in &items {
                        let product_id: String = item.try_get("product_id").map_err(storage_err)?;
                        let quantity: i32 = item.try_get("quantity").map_err(storage_err)?;

                        let decremented = sqlx::query(
                            "UPDATE products SET stock = stock - $1 WHERE id = $2 AND stock >= $1",
                        )
                        .bind(quantity)
                        .bind(&product_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?
                        .rows_affected();

                        if decremented == 0 {
                            tracing::warn!(
                                %product_id,
                                quantity,
                                order_id = %settlement.entity_id,
                                "insufficient stock, rolling back settlement"
                            );
                            return Err(NestaError::InsufficientStock { product_id });
                        }
                    }
                }
                PaymentKind::Subscription => {
                    let activated = sqlx::query(
                        "UPDATE subscriptions
                         SET status = $1, current_period_start = $2, current_period_end = $3
                         WHERE id = $4",
                    )
                    .bind(SubscriptionStatus::Active.as_str())
                    .bind(settlement.settled_at)
                    .bind(settlement.period_end)
                    .bind(&settlement.entity_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?
                    .rows_affected();
                    if activated == 0 {
                        return Err(NestaError::NotFound(format!(
                            "subscription {}",
                            settlement.entity_id
                        )));
                    }
                }
            }
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(SettlementOutcome::Applied)
    }
}
