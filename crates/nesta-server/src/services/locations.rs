use std::sync::Arc;

use chrono::Utc;
use nesta_core::{
    CredentialStore, InterestRequest, Location, LocationStore, NestaConfig, NestaError,
    NestaResult, Principal,
};
use nesta_crypto::new_id;

/// Counts verified interest per location and launches it at the threshold.
pub struct ThresholdTracker<G: LocationStore, C: CredentialStore> {
    store: Arc<G>,
    credentials: Arc<C>,
    config: Arc<NestaConfig>,
}

fn existing_request_error(request: &InterestRequest) -> NestaError {
    if request.verified {
        NestaError::AlreadyVerified
    } else {
        NestaError::PendingVerification
    }
}

impl<G: LocationStore, C: CredentialStore> ThresholdTracker<G, C> {
    pub fn new(store: Arc<G>, credentials: Arc<C>, config: Arc<NestaConfig>) -> Self {
        Self {
            store,
            credentials,
            config,
        }
    }

    pub async fn create_interest_request(
        &self,
        complex_id: &str,
        phone: &str,
    ) -> NestaResult<InterestRequest> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(NestaError::Validation("phone is required".to_string()));
        }
        self.store
            .get_location(complex_id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("location {complex_id}")))?;

        if let Some(existing) = self.store.find_interest_request(complex_id, phone).await? {
            return Err(existing_request_error(&existing));
        }

        let request = InterestRequest {
            id: new_id(),
            complex_id: complex_id.to_string(),
            phone: phone.to_string(),
            verified: false,
            created_at: Utc::now(),
            verified_at: None,
        };
        if !self.store.create_interest_request(&request).await? {
            // Lost an insert race to an identical request.
            let existing = self
                .store
                .find_interest_request(complex_id, phone)
                .await?
                .ok_or_else(|| NestaError::Internal("interest request vanished".to_string()))?;
            return Err(existing_request_error(&existing));
        }

        tracing::info!(request_id = %request.id, complex_id, "interest request created");
        Ok(request)
    }

    /// Verify a request on behalf of `principal`, who must own the request's
    /// phone number or be an admin.
    pub async fn verify_request(
        &self,
        principal: &Principal,
        request_id: &str,
    ) -> NestaResult<Location> {
        let request = self
            .store
            .get_interest_request(request_id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("request {request_id}")))?;

        if !principal.is_admin() {
            let owns_phone = self
                .credentials
                .get_user_by_id(&principal.user_id)
                .await?
                .is_some_and(|user| user.phone == request.phone);
            if !owns_phone {
                return Err(NestaError::Forbidden(
                    "request belongs to another phone".to_string(),
                ));
            }
        }
        if request.verified {
            return Err(NestaError::AlreadyVerified);
        }

        let location = self
            .store
            .verify_interest_request(
                request_id,
                self.config.locations.threshold_status,
                Utc::now(),
            )
            .await?;

        tracing::info!(
            request_id,
            location_id = %location.id,
            current_requests = location.current_requests,
            threshold = location.threshold_n,
            "interest request verified"
        );
        Ok(location)
    }
}
