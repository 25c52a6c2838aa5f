//! The transactional core. Each service borrows `Arc` handles to the stores
//! and the config; all cross-request coordination is left to the stores.

pub mod locations;
pub mod orders;
pub mod session;
pub mod settlement;
pub mod subscriptions;

pub use locations::ThresholdTracker;
pub use orders::{NewOrder, OrderLine, OrderLedger, PlacedOrder};
pub use session::{CodeIssued, SessionAuthority, TokenPair};
pub use settlement::{InitPayment, SettlementCoordinator, WebhookEvent};
pub use subscriptions::{
    NewSubscription, SubscriptionAction, SubscriptionCreated, SubscriptionLedger,
};
