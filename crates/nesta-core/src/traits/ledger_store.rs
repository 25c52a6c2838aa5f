use async_trait::async_trait;

use crate::error::NestaResult;
use crate::types::{
    Order, OrderItem, Payment, Plan, Product, Settlement, SettlementOutcome, Subscription,
    SubscriptionStatus,
};

/// Orders, stock, subscriptions and the payments that settle them.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn create_product(&self, product: &Product) -> NestaResult<()>;
    async fn update_product(&self, product: &Product) -> NestaResult<()>;
    async fn get_product(&self, id: &str) -> NestaResult<Option<Product>>;

    async fn create_plan(&self, plan: &Plan) -> NestaResult<()>;
    async fn get_plan(&self, id: &str) -> NestaResult<Option<Plan>>;

    /// Insert an order and all of its line items in one transaction.
    async fn create_order(&self, order: &Order, items: &[OrderItem]) -> NestaResult<()>;
    async fn get_order(&self, id: &str) -> NestaResult<Option<Order>>;
    async fn get_order_items(&self, order_id: &str) -> NestaResult<Vec<OrderItem>>;

    async fn create_subscription(&self, subscription: &Subscription) -> NestaResult<()>;
    async fn get_subscription(&self, id: &str) -> NestaResult<Option<Subscription>>;
    async fn update_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> NestaResult<()>;

    async fn create_payment(&self, payment: &Payment) -> NestaResult<()>;
    async fn get_payment(&self, id: &str) -> NestaResult<Option<Payment>>;
    async fn get_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> NestaResult<Option<Payment>>;

    /// Apply a payment status change and its side effects in one transaction.
    ///
    /// The payment row is updated only if its status differs from the
    /// incoming one; if it already matches, nothing is written and
    /// `AlreadyApplied` is returned. A paid order flips to `PAID` and every
    /// line decrements its product's stock under an exclusive row lock,
    /// failing with `InsufficientStock` (and rolling everything back) if any
    /// product would go negative. A paid subscription becomes `ACTIVE` with a
    /// fresh billing period.
    async fn settle_payment(&self, settlement: &Settlement) -> NestaResult<SettlementOutcome>;
}
