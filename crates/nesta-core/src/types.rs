use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NestaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationStatus {
    /// Gathering interest requests; service not yet scheduled.
    Collecting,
    Planned,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    PaymentPending,
    Paused,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Order,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Init,
    Pending,
    Paid,
    Failed,
    Canceled,
    Refunded,
    /// A provider status outside the known set, stored verbatim. It never
    /// triggers side effects.
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Collecting => "COLLECTING",
            LocationStatus::Planned => "PLANNED",
            LocationStatus::Active => "ACTIVE",
        }
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Paid => "PAID",
        }
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PaymentPending => "PAYMENT_PENDING",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Canceled => "CANCELED",
        }
    }
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Order => "order",
            PaymentKind::Subscription => "subscription",
        }
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Init => "INIT",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Other(status) => status,
        }
    }
}

impl FromStr for Role {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(NestaError::Validation(format!("unknown role: {other}"))),
        }
    }
}

impl FromStr for LocationStatus {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COLLECTING" => Ok(LocationStatus::Collecting),
            "PLANNED" => Ok(LocationStatus::Planned),
            "ACTIVE" => Ok(LocationStatus::Active),
            other => Err(NestaError::Validation(format!("unknown location status: {other}"))),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PAID" => Ok(OrderStatus::Paid),
            other => Err(NestaError::Validation(format!("unknown order status: {other}"))),
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "PAYMENT_PENDING" => Ok(SubscriptionStatus::PaymentPending),
            "PAUSED" => Ok(SubscriptionStatus::Paused),
            "CANCELED" => Ok(SubscriptionStatus::Canceled),
            other => Err(NestaError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

impl FromStr for PaymentKind {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(PaymentKind::Order),
            "subscription" => Ok(PaymentKind::Subscription),
            other => Err(NestaError::Validation(format!("unknown payment type: {other}"))),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = NestaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(PaymentStatus::Init),
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELED" => Ok(PaymentStatus::Canceled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "" => Err(NestaError::Validation("payment status is required".to_string())),
            other => Ok(PaymentStatus::Other(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PaymentStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PaymentStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller of an operation, decoded from an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this principal may act on an entity owned by `owner_id`.
    pub fn can_act_for(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub default_address: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub id: String,
    pub phone: String,
    pub role: Role,
}

/// Self-service profile fields. `None` leaves the stored value as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub default_address: Option<serde_json::Value>,
}

/// A hashed one-time code. Rows are append-only per phone; the most recently
/// created row is the one that counts.
#[derive(Debug, Clone)]
pub struct OneTimeCode {
    pub id: String,
    pub phone: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OneTimeCode {
    pub fn blocked_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.blocked_until.filter(|until| *until > now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether a new code may replace this one at `at`: the previous code
    /// must be at least `min_interval` old and not blocked.
    pub fn ensure_replaceable(
        &self,
        at: DateTime<Utc>,
        min_interval: chrono::Duration,
    ) -> Result<(), NestaError> {
        let retry_at = self.created_at + min_interval;
        if at < retry_at {
            return Err(NestaError::RateLimited { retry_at });
        }
        if let Some(until) = self.blocked_at(at) {
            return Err(NestaError::Blocked { until });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub city: String,
    pub status: LocationStatus,
    pub threshold_n: i32,
    pub current_requests: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterestRequest {
    pub id: String,
    pub complex_id: String,
    pub phone: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub stock: i32,
    pub category: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub address: serde_json::Value,
    pub comment: Option<String>,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// A line item. `price_cents` is the unit price captured when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub complex_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub address: serde_json::Value,
    pub time_window: Option<String>,
    pub instructions: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub entity_id: String,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A payment status transition to be applied atomically with its side effects.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub payment_id: String,
    pub kind: PaymentKind,
    pub entity_id: String,
    pub status: PaymentStatus,
    pub payload: serde_json::Value,
    pub settled_at: DateTime<Utc>,
    /// End of the billing period started by a paid subscription.
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Applied,
    /// The payment already carried the incoming status; nothing was written.
    AlreadyApplied,
}
