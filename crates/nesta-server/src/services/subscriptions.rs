use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use nesta_core::{
    LedgerStore, LocationStatus, LocationStore, NestaConfig, NestaError, NestaResult, Principal,
    Subscription, SubscriptionStatus,
};
use nesta_crypto::new_id;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub complex_id: String,
    pub plan_id: String,
    pub address: serde_json::Value,
    pub time_window: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionCreated {
    pub subscription: Subscription,
    /// The caller must initialise a payment before the subscription starts.
    pub requires_payment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Pause,
    Resume,
    Cancel,
}

impl FromStr for SubscriptionAction {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(SubscriptionAction::Pause),
            "resume" => Ok(SubscriptionAction::Resume),
            "cancel" => Ok(SubscriptionAction::Cancel),
            _ => Err(NestaError::Validation("invalid action".to_string())),
        }
    }
}

impl SubscriptionAction {
    /// The status an action moves `current` to.
    ///
    /// `CANCELED` is terminal, and a subscription awaiting its first payment
    /// can only be canceled.
    pub fn apply(self, current: SubscriptionStatus) -> NestaResult<SubscriptionStatus> {
        match (current, self) {
            (SubscriptionStatus::Canceled, _) => Err(NestaError::Validation(
                "subscription is canceled".to_string(),
            )),
            (_, SubscriptionAction::Cancel) => Ok(SubscriptionStatus::Canceled),
            (SubscriptionStatus::PaymentPending, _) => Err(NestaError::Validation(
                "subscription is awaiting payment".to_string(),
            )),
            (_, SubscriptionAction::Pause) => Ok(SubscriptionStatus::Paused),
            (_, SubscriptionAction::Resume) => Ok(SubscriptionStatus::Active),
        }
    }
}

pub struct SubscriptionLedger<L: LedgerStore, G: LocationStore> {
    store: Arc<L>,
    locations: Arc<G>,
    config: Arc<NestaConfig>,
}

impl<L: LedgerStore, G: LocationStore> SubscriptionLedger<L, G> {
    pub fn new(store: Arc<L>, locations: Arc<G>, config: Arc<NestaConfig>) -> Self {
        Self {
            store,
            locations,
            config,
        }
    }

    pub async fn create_subscription(
        &self,
        principal: &Principal,
        input: NewSubscription,
    ) -> NestaResult<SubscriptionCreated> {
        let location = self
            .locations
            .get_location(&input.complex_id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("location {}", input.complex_id)))?;
        if location.status != LocationStatus::Active {
            return Err(NestaError::LocationNotActive);
        }

        let plan = self
            .store
            .get_plan(&input.plan_id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("plan {}", input.plan_id)))?;
        if !plan.is_active {
            return Err(NestaError::PlanNotActive);
        }

        let now = Utc::now();
        let requires_payment = plan.price_cents > 0;
        let (status, period_start, period_end) = if requires_payment {
            (SubscriptionStatus::PaymentPending, None, None)
        } else {
            (
                SubscriptionStatus::Active,
                Some(now),
                Some(now + self.config.billing.period()),
            )
        };

        let subscription = Subscription {
            id: new_id(),
            user_id: principal.user_id.clone(),
            complex_id: location.id,
            plan_id: plan.id,
            status,
            address: input.address,
            time_window: input.time_window.filter(|s| !s.trim().is_empty()),
            instructions: input.instructions.filter(|s| !s.trim().is_empty()),
            current_period_start: period_start,
            current_period_end: period_end,
            created_at: now,
        };
        self.store.create_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            status = %subscription.status,
            "subscription created"
        );
        Ok(SubscriptionCreated {
            subscription,
            requires_payment,
        })
    }

    pub async fn update_subscription(
        &self,
        principal: &Principal,
        id: &str,
        action: SubscriptionAction,
    ) -> NestaResult<Subscription> {
        let mut subscription = self
            .store
            .get_subscription(id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("subscription {id}")))?;
        if !principal.can_act_for(&subscription.user_id) {
            return Err(NestaError::Forbidden(format!(
                "subscription {id} belongs to another user"
            )));
        }

        let next = action.apply(subscription.status)?;
        self.store.update_subscription_status(id, next).await?;

        tracing::info!(subscription_id = %id, from = %subscription.status, to = %next, "subscription updated");
        subscription.status = next;
        Ok(subscription)
    }
}
