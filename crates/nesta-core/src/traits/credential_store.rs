use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::NestaResult;
use crate::types::{CreateUserInput, OneTimeCode, ProfileUpdate, RefreshTokenRecord, User};

/// Persistence for users, one-time codes and refresh tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Round-trip to the database.
    async fn ping(&self) -> NestaResult<()>;

    /// Insert a user. If another user already holds the phone number the
    /// existing row is returned instead.
    async fn create_user(&self, input: &CreateUserInput) -> NestaResult<User>;
    async fn get_user_by_id(&self, id: &str) -> NestaResult<Option<User>>;
    async fn get_user_by_phone(&self, phone: &str) -> NestaResult<Option<User>>;
    /// Overwrite the fields set in `update`. Fails `NotFound` for an unknown user.
    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> NestaResult<User>;

    /// Insert `code` unless the phone's latest code is younger than
    /// `min_interval` (`RateLimited`) or blocked (`Blocked`). The check and
    /// the insert are serialised per phone.
    async fn create_code(&self, code: &OneTimeCode, min_interval: Duration) -> NestaResult<()>;
    async fn latest_code(&self, phone: &str) -> NestaResult<Option<OneTimeCode>>;
    /// Reserve one verification attempt before the guess is compared.
    ///
    /// Returns the new attempt count, or `None` once `max_attempts` are spent
    /// or while the code is blocked at `now`. Reserving the last attempt sets
    /// `blocked_until`.
    async fn claim_attempt(
        &self,
        id: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> NestaResult<Option<i32>>;
    /// Hand back an attempt whose guess matched, lifting the block it may have set.
    async fn release_attempt(&self, id: &str) -> NestaResult<()>;

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> NestaResult<()>;
    async fn get_refresh_token(&self, token: &str) -> NestaResult<Option<RefreshTokenRecord>>;
    /// Mark a token revoked. Already-revoked and unknown tokens are left untouched.
    async fn revoke_refresh_token(&self, token: &str, revoked_at: DateTime<Utc>)
        -> NestaResult<u64>;
}
