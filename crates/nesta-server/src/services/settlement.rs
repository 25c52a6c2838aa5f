use std::sync::Arc;

use chrono::Utc;
use nesta_core::{
    LedgerStore, NestaConfig, NestaError, NestaResult, Payment, PaymentKind, PaymentStatus,
    Principal, Settlement, SettlementOutcome,
};
use nesta_crypto::new_id;

#[derive(Debug, Clone)]
pub struct InitPayment {
    pub kind: PaymentKind,
    pub entity_id: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub amount_cents: i64,
}

/// A status callback from a payment provider.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: String,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub payload: serde_json::Value,
}

/// Reconciles provider callbacks with order and subscription state.
pub struct SettlementCoordinator<L: LedgerStore> {
    store: Arc<L>,
    config: Arc<NestaConfig>,
}

impl<L: LedgerStore> SettlementCoordinator<L> {
    pub fn new(store: Arc<L>, config: Arc<NestaConfig>) -> Self {
        Self { store, config }
    }

    /// Record a payment in `INIT`. Nothing happens to the referenced entity
    /// until the provider reports back.
    pub async fn init_payment(
        &self,
        principal: &Principal,
        input: InitPayment,
    ) -> NestaResult<Payment> {
        let provider = input.provider.trim();
        if provider.is_empty() {
            return Err(NestaError::Validation("provider is required".to_string()));
        }
        if input.amount_cents < 0 {
            return Err(NestaError::Validation(
                "amount_cents must not be negative".to_string(),
            ));
        }

        let owner_id = match input.kind {
            PaymentKind::Order => {
                self.store
                    .get_order(&input.entity_id)
                    .await?
                    .ok_or_else(|| NestaError::NotFound(format!("order {}", input.entity_id)))?
                    .user_id
            }
            PaymentKind::Subscription => {
                self.store
                    .get_subscription(&input.entity_id)
                    .await?
                    .ok_or_else(|| {
                        NestaError::NotFound(format!("subscription {}", input.entity_id))
                    })?
                    .user_id
            }
        };
        if !principal.can_act_for(&owner_id) {
            return Err(NestaError::Forbidden(format!(
                "{} {} belongs to another user",
                input.kind.as_str(),
                input.entity_id
            )));
        }

        let payment = Payment {
            id: new_id(),
            kind: input.kind,
            entity_id: input.entity_id,
            provider: provider.to_string(),
            provider_payment_id: input
                .provider_payment_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            status: PaymentStatus::Init,
            amount_cents: input.amount_cents,
            payload: None,
            created_at: Utc::now(),
        };
        self.store.create_payment(&payment).await?;

        tracing::info!(
            payment_id = %payment.id,
            kind = payment.kind.as_str(),
            entity_id = %payment.entity_id,
            amount_cents = payment.amount_cents,
            "payment initialised"
        );
        Ok(payment)
    }

    /// Apply a provider callback. Redelivery of a status the payment already
    /// carries is a successful no-op.
    pub async fn handle_webhook(&self, event: WebhookEvent) -> NestaResult<SettlementOutcome> {
        let payment = self
            .store
            .get_payment_by_provider_id(&event.provider, &event.provider_payment_id)
            .await?
            .ok_or_else(|| {
                NestaError::NotFound(format!(
                    "payment {}/{}",
                    event.provider, event.provider_payment_id
                ))
            })?;

        if payment.status == event.status {
            tracing::debug!(payment_id = %payment.id, status = %event.status, "duplicate webhook ignored");
            return Ok(SettlementOutcome::AlreadyApplied);
        }

        let now = Utc::now();
        let outcome = self
            .store
            .settle_payment(&Settlement {
                payment_id: payment.id.clone(),
                kind: payment.kind,
                entity_id: payment.entity_id.clone(),
                status: event.status.clone(),
                payload: event.payload,
                settled_at: now,
                period_end: now + self.config.billing.period(),
            })
            .await?;

        match outcome {
            SettlementOutcome::Applied => tracing::info!(
                payment_id = %payment.id,
                from = %payment.status,
                to = %event.status,
                "payment settled"
            ),
            SettlementOutcome::AlreadyApplied => tracing::debug!(
                payment_id = %payment.id,
                status = %event.status,
                "concurrent webhook already applied"
            ),
        }
        Ok(outcome)
    }
}
