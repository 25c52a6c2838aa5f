use std::sync::Arc;

use nesta_core::NestaConfig;
use nesta_core::traits::*;

use crate::services::{
    OrderLedger, SessionAuthority, SettlementCoordinator, SubscriptionLedger, ThresholdTracker,
};

#[derive(Clone)]
pub struct AppState<C, L, G>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    pub credential_store: Arc<C>,
    pub ledger_store: Arc<L>,
    pub location_store: Arc<G>,
    pub config: Arc<NestaConfig>,
}

impl<C, L, G> AppState<C, L, G>
where
    C: CredentialStore,
    L: LedgerStore,
    G: LocationStore,
{
    pub fn new(credential_store: C, ledger_store: L, location_store: G, config: NestaConfig) -> Self {
        Self {
            credential_store: Arc::new(credential_store),
            ledger_store: Arc::new(ledger_store),
            location_store: Arc::new(location_store),
            config: Arc::new(config),
        }
    }

    pub fn sessions(&self) -> SessionAuthority<C> {
        SessionAuthority::new(self.credential_store.clone(), self.config.clone())
    }

    pub fn settlements(&self) -> SettlementCoordinator<L> {
        SettlementCoordinator::new(self.ledger_store.clone(), self.config.clone())
    }

    pub fn orders(&self) -> OrderLedger<L> {
        OrderLedger::new(self.ledger_store.clone())
    }

    pub fn subscriptions(&self) -> SubscriptionLedger<L, G> {
        SubscriptionLedger::new(
            self.ledger_store.clone(),
            self.location_store.clone(),
            self.config.clone(),
        )
    }

    pub fn thresholds(&self) -> ThresholdTracker<G, C> {
        ThresholdTracker::new(
            self.location_store.clone(),
            self.credential_store.clone(),
            self.config.clone(),
        )
    }
}
