use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::NestaResult;
use crate::types::{InterestRequest, Location, LocationStatus};

#[async_trait]
pub trait LocationStore: Send + Sync + 'static {
    async fn create_location(&self, location: &Location) -> NestaResult<()>;
    async fn get_location(&self, id: &str) -> NestaResult<Option<Location>>;

    /// Insert an unverified request. Returns `false` without writing if a
    /// request for the same `(complex_id, phone)` already exists.
    async fn create_interest_request(&self, request: &InterestRequest) -> NestaResult<bool>;
    async fn get_interest_request(&self, id: &str) -> NestaResult<Option<InterestRequest>>;
    async fn find_interest_request(
        &self,
        complex_id: &str,
        phone: &str,
    ) -> NestaResult<Option<InterestRequest>>;

    /// Mark a request verified, bump its location's request count and, when
    /// the new count equals a positive threshold, set `threshold_status`.
    /// All three writes commit together. Fails `AlreadyVerified` if the
    /// request was verified first by someone else.
    async fn verify_interest_request(
        &self,
        request_id: &str,
        threshold_status: LocationStatus,
        verified_at: DateTime<Utc>,
    ) -> NestaResult<Location>;
}
