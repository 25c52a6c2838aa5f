use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};

use nesta_core::{
    LedgerStore, NestaError, NestaResult, Order, OrderItem, OrderStatus, Payment, PaymentKind,
    PaymentStatus, Plan, Product, Settlement, SettlementOutcome, Subscription,
    SubscriptionStatus,
};

use crate::convert::{
    format_datetime, format_datetime_opt, insert_err, parse_column, parse_datetime,
    parse_datetime_opt, storage_err,
};

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

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

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, NestaError> {
    Ok(Product {
        id: row.try_get("id").map_err(storage_err)?,
        title: row.try_get("title").map_err(storage_err)?,
        price_cents: row.try_get("price_cents").map_err(storage_err)?,
        stock: row.try_get("stock").map_err(storage_err)?,
        category: row.try_get("category").map_err(storage_err)?,
        is_active: row.try_get("is_active").map_err(storage_err)?,
    })
}

fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, NestaError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let Json(address): Json<serde_json::Value> =
        row.try_get("address_json").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;

    Ok(Order {
        id: row.try_get("id").map_err(storage_err)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        address,
        comment: row.try_get("comment").map_err(storage_err)?,
        total_cents: row.try_get("total_cents").map_err(storage_err)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> Result<Subscription, NestaError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let Json(address): Json<serde_json::Value> =
        row.try_get("address_json").map_err(storage_err)?;
    let period_start: Option<String> =
        row.try_get("current_period_start").map_err(storage_err)?;
    let period_end: Option<String> = row.try_get("current_period_end").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;

    Ok(Subscription {
        id: row.try_get("id").map_err(storage_err)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        complex_id: row.try_get("complex_id").map_err(storage_err)?,
        plan_id: row.try_get("plan_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        address,
        time_window: row.try_get("time_window").map_err(storage_err)?,
        instructions: row.try_get("instructions").map_err(storage_err)?,
        current_period_start: parse_datetime_opt(period_start.as_deref())?,
        current_period_end: parse_datetime_opt(period_end.as_deref())?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_payment(row: &sqlx::sqlite::SqliteRow) -> Result<Payment, NestaError> {
    let kind: String = row.try_get("type").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let payload: Option<Json<serde_json::Value>> =
        row.try_get("payload_json").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;

    Ok(Payment {
        id: row.try_get("id").map_err(storage_err)?,
        kind: parse_column(&kind)?,
        entity_id: row.try_get("entity_id").map_err(storage_err)?,
        provider: row.try_get("provider").map_err(storage_err)?,
        provider_payment_id: row.try_get("provider_payment_id").map_err(storage_err)?,
        status: parse_column(&status)?,
        amount_cents: row.try_get("amount_cents").map_err(storage_err)?,
        payload: payload.map(|Json(v)| v),
        created_at: parse_datetime(&created_at)?,
    })
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn create_product(&self, product: &Product) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO products (id, title, price_cents, stock, category, is_active) VALUES (?, ?, ?, ?, ?, ?)",
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
            "UPDATE products SET title = ?, price_cents = ?, stock = ?, category = ?, is_active = ? WHERE id = ?",
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
        let row = sqlx::query(
            "SELECT id, title, price_cents, stock, category, is_active FROM products WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_product(r)?)),
            None => Ok(None),
        }
    }

    async fn create_plan(&self, plan: &Plan) -> NestaResult<()> {
        sqlx::query("INSERT INTO plans (id, name, price_cents, is_active) VALUES (?, ?, ?, ?)")
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
        let row = sqlx::query("SELECT id, name, price_cents, is_active FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(Plan {
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
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(Json(&order.address))
        .bind(&order.comment)
        .bind(order.total_cents)
        .bind(format_datetime(&order.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for item in items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, price_cents) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.price_cents)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> NestaResult<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, user_id, status, address_json, comment, total_cents, created_at FROM orders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_order(r)?)),
            None => Ok(None),
        }
    }

    async fn get_order_items(&self, order_id: &str) -> NestaResult<Vec<OrderItem>> {
        let rows = sqlx::query(
            "SELECT id, order_id, product_id, quantity, price_cents FROM order_items
             WHERE order_id = ? ORDER BY rowid",
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
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(&subscription.complex_id)
        .bind(&subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(Json(&subscription.address))
        .bind(&subscription.time_window)
        .bind(&subscription.instructions)
        .bind(format_datetime_opt(&subscription.current_period_start))
        .bind(format_datetime_opt(&subscription.current_period_end))
        .bind(format_datetime(&subscription.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> NestaResult<Option<Subscription>> {
        let sql = format!("{SUBSCRIPTION_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_subscription(r)?)),
            None => Ok(None),
        }
    }

    async fn update_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> NestaResult<()> {
        let result = sqlx::query("UPDATE subscriptions SET status = ? WHERE id = ?")
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
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&payment.id)
        .bind(payment.kind.as_str())
        .bind(&payment.entity_id)
        .bind(&payment.provider)
        .bind(&payment.provider_payment_id)
        .bind(payment.status.as_str())
        .bind(payment.amount_cents)
        .bind(payment.payload.as_ref().map(Json))
        .bind(format_datetime(&payment.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "payment"))?;
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> NestaResult<Option<Payment>> {
        let sql = format!("{PAYMENT_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn get_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> NestaResult<Option<Payment>> {
        let sql = format!("{PAYMENT_SELECT} WHERE provider = ? AND provider_payment_id = ?");
        let row = sqlx::query(&sql)
            .bind(provider)
            .bind(provider_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_payment(r)?)),
            None => Ok(None),
        }
    }

    async fn settle_payment(&self, settlement: &Settlement) -> NestaResult<SettlementOutcome> {
        // IMMEDIATE takes the database write lock up front, which serialises
        // concurrent settlements the way row locks do on PostgreSQL.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_err)?;

        let updated = sqlx::query(
            "UPDATE payments SET status = ?, payload_json = ? WHERE id = ? AND status <> ?",
        )
        .bind(settlement.status.as_str())
        .bind(Json(&settlement.payload))
        .bind(&settlement.payment_id)
        .bind(settlement.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if updated == 0 {
            let exists = sqlx::query("SELECT 1 FROM payments WHERE id = ?")
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
                    let flipped = sqlx::query("UPDATE orders SET status = ? WHERE id = ?")
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

                    let items = sqlx::query(
                        "SELECT product_id, quantity FROM order_items WHERE order_id = ? ORDER BY product_id",
                    )
                    .bind(&settlement.entity_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(storage_err)?;

                    for item in &items {
                        let product_id: String = item.try_get("product_id").map_err(storage_err)?;
                        let quantity: i32 = item.try_get("quantity").map_err(storage_err)?;

                        let stock: i32 = sqlx::query("SELECT stock FROM products WHERE id = ?")
                            .bind(&product_id)
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(storage_err)?
                            .ok_or_else(|| NestaError::NotFound(format!("product {product_id}")))?
                            .try_get("stock")
                            .map_err(storage_err)?;

                        let new_stock = stock - quantity;
                        if new_stock < 0 {
                            tracing::warn!(
                                %product_id,
                                stock,
                                quantity,
                                order_id = %settlement.entity_id,
                                "insufficient stock, rolling back settlement"
                            );
                            return Err(NestaError::InsufficientStock { product_id });
                        }

                        sqlx::query("UPDATE products SET stock = ? WHERE id = ?")
                            .bind(new_stock)
                            .bind(&product_id)
                            .execute(&mut *tx)
                            .await
                            .map_err(storage_err)?;
                    }
                }
                PaymentKind::Subscription => {
                    let activated = sqlx::query(
                        "UPDATE subscriptions
                         SET status = ?, current_period_start = ?, current_period_end = ?
                         WHERE id = ?",
                    )
                    .bind(SubscriptionStatus::Active.as_str())
                    .bind(format_datetime(&settlement.settled_at))
                    .bind(format_datetime(&settlement.period_end))
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
