pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::NestaConfig;
pub use error::{NestaError, NestaResult};
pub use traits::{CredentialStore, LedgerStore, LocationStore};
pub use types::{
    CreateUserInput, InterestRequest, Location, LocationStatus, OneTimeCode, Order, OrderItem,
    OrderStatus, Payment, PaymentKind, PaymentStatus, Plan, Principal, Product, ProfileUpdate,
    RefreshTokenRecord, Role, Settlement, SettlementOutcome, Subscription, SubscriptionStatus,
    User,
};
