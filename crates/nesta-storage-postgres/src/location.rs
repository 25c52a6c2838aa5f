use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use nesta_core::{
    InterestRequest, Location, LocationStatus, LocationStore, NestaError, NestaResult,
};

use crate::{insert_err, parse_column, storage_err};

#[derive(Clone)]
pub struct PostgresLocationStore {
    pool: PgPool,
}

const LOCATION_SELECT: &str =
    "SELECT id, name, city, status, threshold_n, current_requests FROM residential_complexes";

const REQUEST_SELECT: &str =
    "SELECT id, complex_id, phone, verified, created_at, verified_at FROM complex_requests";

fn row_to_location(row: &sqlx::postgres::PgRow) -> Result<Location, NestaError> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    Ok(Location {
        id: row.try_get("id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        city: row.try_get("city").map_err(storage_err)?,
        status: parse_column(&status)?,
        threshold_n: row.try_get("threshold_n").map_err(storage_err)?,
        current_requests: row.try_get("current_requests").map_err(storage_err)?,
    })
}

fn row_to_request(row: &sqlx::postgres::PgRow) -> Result<InterestRequest, NestaError> {
    Ok(InterestRequest {
        id: row.try_get("id").map_err(storage_err)?,
        complex_id: row.try_get("complex_id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        verified: row.try_get("verified").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        verified_at: row.try_get("verified_at").map_err(storage_err)?,
    })
}

impl PostgresLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PostgresLocationStore {
    async fn create_location(&self, location: &Location) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO residential_complexes (id, name, city, status, threshold_n, current_requests)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&location.id)
        .bind(&location.name)
        .bind(&location.city)
        .bind(location.status.as_str())
        .bind(location.threshold_n)
        .bind(location.current_requests)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, "location"))?;
        Ok(())
    }

    async fn get_location(&self, id: &str) -> NestaResult<Option<Location>> {
        let row = sqlx::query(&format!("{LOCATION_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_location).transpose()
    }

    async fn create_interest_request(&self, request: &InterestRequest) -> NestaResult<bool> {
        let result = sqlx::query(
            "INSERT INTO complex_requests (id, complex_id, phone, verified, created_at, verified_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (complex_id, phone) DO NOTHING",
        )
        .bind(&request.id)
        .bind(&request.complex_id)
        .bind(&request.phone)
        .bind(request.verified)
        .bind(request.created_at)
        .bind(request.verified_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_interest_request(&self, id: &str) -> NestaResult<Option<InterestRequest>> {
        let row = sqlx::query(&format!("{REQUEST_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn find_interest_request(
        &self,
        complex_id: &str,
        phone: &str,
    ) -> NestaResult<Option<InterestRequest>> {
        let row = sqlx::query(&format!(
            "{REQUEST_SELECT} WHERE complex_id = $1 AND phone = $2"
        ))
        .bind(complex_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn verify_interest_request(
        &self,
        request_id: &str,
        threshold_status: LocationStatus,
        verified_at: DateTime<Utc>,
    ) -> NestaResult<Location> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let flipped = sqlx::query(
            "UPDATE complex_requests SET verified = TRUE, verified_at = $1
             WHERE id = $2 AND verified = FALSE
             RETURNING complex_id",
        )
        .bind(verified_at)
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let complex_id: String = match flipped {
            Some(row) => row.try_get("complex_id").map_err(storage_err)?,
            None => {
                let exists = sqlx::query("SELECT 1 FROM complex_requests WHERE id = $1")
                    .bind(request_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                return match exists {
                    Some(_) => Err(NestaError::AlreadyVerified),
                    None => Err(NestaError::NotFound(format!("request {request_id}"))),
                };
            }
        };

        let row = sqlx::query(&format!("{LOCATION_SELECT} WHERE id = $1 FOR UPDATE"))
            .bind(&complex_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| NestaError::NotFound(format!("location {complex_id}")))?;
        let mut location = row_to_location(&row)?;

        location.current_requests += 1;
        if location.threshold_n > 0 && location.current_requests == location.threshold_n {
            tracing::info!(
                location_id = %location.id,
                threshold = location.threshold_n,
                status = %threshold_status,
                "location reached interest threshold"
            );
            location.status = threshold_status;
        }

        sqlx::query(
            "UPDATE residential_complexes SET current_requests = $1, status = $2 WHERE id = $3",
        )
        .bind(location.current_requests)
        .bind(location.status.as_str())
        .bind(&location.id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(location)
    }
}
