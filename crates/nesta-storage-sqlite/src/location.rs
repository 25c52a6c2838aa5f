use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use nesta_core::{
    InterestRequest, Location, LocationStatus, LocationStore, NestaError, NestaResult,
};

use crate::convert::{
    format_datetime, format_datetime_opt, insert_err, parse_column, parse_datetime,
    parse_datetime_opt, storage_err,
};

#[derive(Clone)]
pub struct SqliteLocationStore {
    pool: SqlitePool,
}

const LOCATION_SELECT: &str =
    "SELECT id, name, city, status, threshold_n, current_requests FROM residential_complexes";

const REQUEST_SELECT: &str =
    "SELECT id, complex_id, phone, verified, created_at, verified_at FROM complex_requests";

fn row_to_location(row: &sqlx::sqlite::SqliteRow) -> Result<Location, NestaError> {
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

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<InterestRequest, NestaError> {
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let verified_at: Option<String> = row.try_get("verified_at").map_err(storage_err)?;
    Ok(InterestRequest {
        id: row.try_get("id").map_err(storage_err)?,
        complex_id: row.try_get("complex_id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        verified: row.try_get("verified").map_err(storage_err)?,
        created_at: parse_datetime(&created_at)?,
        verified_at: parse_datetime_opt(verified_at.as_deref())?,
    })
}

impl SqliteLocationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for SqliteLocationStore {
    async fn create_location(&self, location: &Location) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO residential_complexes (id, name, city, status, threshold_n, current_requests)
             VALUES (?, ?, ?, ?, ?, ?)",
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
        let sql = format!("{LOCATION_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_location(r)?)),
            None => Ok(None),
        }
    }

    async fn create_interest_request(&self, request: &InterestRequest) -> NestaResult<bool> {
        let result = sqlx::query(
            "INSERT INTO complex_requests (id, complex_id, phone, verified, created_at, verified_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (complex_id, phone) DO NOTHING",
        )
        .bind(&request.id)
        .bind(&request.complex_id)
        .bind(&request.phone)
        .bind(request.verified)
        .bind(format_datetime(&request.created_at))
        .bind(format_datetime_opt(&request.verified_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_interest_request(&self, id: &str) -> NestaResult<Option<InterestRequest>> {
        let sql = format!("{REQUEST_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn find_interest_request(
        &self,
        complex_id: &str,
        phone: &str,
    ) -> NestaResult<Option<InterestRequest>> {
        let sql = format!("{REQUEST_SELECT} WHERE complex_id = ? AND phone = ?");
        let row = sqlx::query(&sql)
            .bind(complex_id)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn verify_interest_request(
        &self,
        request_id: &str,
        threshold_status: LocationStatus,
        verified_at: DateTime<Utc>,
    ) -> NestaResult<Location> {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_err)?;

        let flipped = sqlx::query(
            "UPDATE complex_requests SET verified = 1, verified_at = ?
             WHERE id = ? AND verified = 0
             RETURNING complex_id",
        )
        .bind(format_datetime(&verified_at))
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let complex_id: String = match flipped {
            Some(row) => row.try_get("complex_id").map_err(storage_err)?,
            None => {
                let exists = sqlx::query("SELECT 1 FROM complex_requests WHERE id = ?")
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

        let sql = format!("{LOCATION_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&complex_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| NestaError::NotFound(format!("location {complex_id}")))?;
        let mut location = row_to_location(&row)?;

        location.current_requests += 1;
        // Equality, not >=: the status is set once, on the crossing request.
        if location.threshold_n > 0 && location.current_requests == location.threshold_n {
            tracing::info!(
                location_id = %location.id,
                threshold = location.threshold_n,
                status = %threshold_status,
                "location reached interest threshold"
            );
            location.status = threshold_status;
        }

        sqlx::query("UPDATE residential_complexes SET current_requests = ?, status = ? WHERE id = ?")
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
