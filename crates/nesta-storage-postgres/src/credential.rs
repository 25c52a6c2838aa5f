use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use nesta_core::{
    CreateUserInput, CredentialStore, NestaError, NestaResult, OneTimeCode, ProfileUpdate,
    RefreshTokenRecord, User,
};

use crate::{parse_column, storage_err};

#[derive(Clone)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

const USER_SELECT: &str =
    "SELECT id, phone, name, email, role, default_address_json, created_at FROM users";

const CODE_SELECT: &str =
    "SELECT id, phone, code_hash, expires_at, attempts, blocked_until, created_at FROM otp_codes";

const LATEST_CODE_WHERE: &str = "WHERE phone = $1 ORDER BY created_at DESC, id DESC LIMIT 1";

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, NestaError> {
    let role: String = row.try_get("role").map_err(storage_err)?;
    let default_address: Option<Json<serde_json::Value>> = row
        .try_get("default_address_json")
        .map_err(storage_err)?;

    Ok(User {
        id: row.try_get("id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        email: row.try_get("email").map_err(storage_err)?,
        role: parse_column(&role)?,
        default_address: default_address.map(|Json(v)| v),
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

fn row_to_code(row: &sqlx::postgres::PgRow) -> Result<OneTimeCode, NestaError> {
    Ok(OneTimeCode {
        id: row.try_get("id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        code_hash: row.try_get("code_hash").map_err(storage_err)?,
        expires_at: row.try_get("expires_at").map_err(storage_err)?,
        attempts: row.try_get("attempts").map_err(storage_err)?,
        blocked_until: row.try_get("blocked_until").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn ping(&self) -> NestaResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn create_user(&self, input: &CreateUserInput) -> NestaResult<User> {
        // The no-op update makes RETURNING yield the row that won the race.
        let row = sqlx::query(
            "INSERT INTO users (id, phone, role) VALUES ($1, $2, $3)
             ON CONFLICT (phone) DO UPDATE SET phone = EXCLUDED.phone
             RETURNING id, phone, name, email, role, default_address_json, created_at",
        )
        .bind(&input.id)
        .bind(&input.phone)
        .bind(input.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        row_to_user(&row)
    }

    async fn get_user_by_id(&self, id: &str) -> NestaResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_phone(&self, phone: &str) -> NestaResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE phone = $1"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> NestaResult<User> {
        let row = sqlx::query(
            "UPDATE users
             SET name = COALESCE($1, name),
                 email = COALESCE($2, email),
                 default_address_json = COALESCE($3, default_address_json)
             WHERE id = $4
             RETURNING id, phone, name, email, role, default_address_json, created_at",
        )
        .bind(update.name.as_deref())
        .bind(update.email.as_deref())
        .bind(update.default_address.as_ref().map(Json))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .ok_or_else(|| NestaError::NotFound(format!("user {id}")))?;

        row_to_user(&row)
    }

    async fn create_code(&self, code: &OneTimeCode, min_interval: Duration) -> NestaResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Serialises senders for one phone until commit, even when the
        // phone has no code row yet to lock.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&code.phone)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let latest = sqlx::query(&format!("{CODE_SELECT} {LATEST_CODE_WHERE}"))
            .bind(&code.phone)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if let Some(ref row) = latest {
            row_to_code(row)?.ensure_replaceable(code.created_at, min_interval)?;
        }

        sqlx::query(
            "INSERT INTO otp_codes (id, phone, code_hash, expires_at, attempts, blocked_until, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&code.id)
        .bind(&code.phone)
        .bind(&code.code_hash)
        .bind(code.expires_at)
        .bind(code.attempts)
        .bind(code.blocked_until)
        .bind(code.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn latest_code(&self, phone: &str) -> NestaResult<Option<OneTimeCode>> {
        let row = sqlx::query(&format!("{CODE_SELECT} {LATEST_CODE_WHERE}"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_code).transpose()
    }

    async fn claim_attempt(
        &self,
        id: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> NestaResult<Option<i32>> {
        let row = sqlx::query(
            "UPDATE otp_codes
             SET attempts = attempts + 1,
                 blocked_until = CASE WHEN attempts + 1 >= $1 THEN $2 ELSE blocked_until END
             WHERE id = $3 AND attempts < $1 AND (blocked_until IS NULL OR blocked_until <= $4)
             RETURNING attempts",
        )
        .bind(max_attempts)
        .bind(blocked_until)
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        if let Some(row) = row {
            return Ok(Some(row.try_get("attempts").map_err(storage_err)?));
        }
        let exists = sqlx::query("SELECT 1 FROM otp_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match exists {
            Some(_) => Ok(None),
            None => Err(NestaError::NotFound("one-time code".to_string())),
        }
    }

    async fn release_attempt(&self, id: &str) -> NestaResult<()> {
        sqlx::query(
            "UPDATE otp_codes SET attempts = GREATEST(attempts - 1, 0), blocked_until = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token, expires_at, revoked_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> NestaResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, token, expires_at, revoked_at FROM refresh_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => Ok(Some(RefreshTokenRecord {
                id: r.try_get("id").map_err(storage_err)?,
                user_id: r.try_get("user_id").map_err(storage_err)?,
                token: r.try_get("token").map_err(storage_err)?,
                expires_at: r.try_get("expires_at").map_err(storage_err)?,
                revoked_at: r.try_get("revoked_at").map_err(storage_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> NestaResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE token = $2 AND revoked_at IS NULL",
        )
        .bind(revoked_at)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}
