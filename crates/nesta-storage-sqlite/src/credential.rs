use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};

use nesta_core::{
    CreateUserInput, CredentialStore, NestaError, NestaResult, OneTimeCode, ProfileUpdate,
    RefreshTokenRecord, User,
};

use crate::convert::{
    format_datetime, format_datetime_opt, parse_column, parse_datetime, parse_datetime_opt,
    storage_err,
};

#[derive(Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

const USER_SELECT: &str =
    "SELECT id, phone, name, email, role, default_address_json, created_at FROM users";

const CODE_SELECT: &str =
    "SELECT id, phone, code_hash, expires_at, attempts, blocked_until, created_at FROM otp_codes";

const LATEST_CODE_WHERE: &str = "WHERE phone = ? ORDER BY created_at DESC, rowid DESC LIMIT 1";

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, NestaError> {
    let role: String = row.try_get("role").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;
    let default_address: Option<Json<serde_json::Value>> =
        row.try_get("default_address_json").map_err(storage_err)?;

    Ok(User {
        id: row.try_get("id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        email: row.try_get("email").map_err(storage_err)?,
        role: parse_column(&role)?,
        default_address: default_address.map(|Json(v)| v),
        created_at: parse_datetime(&created_at)?,
    })
}

fn row_to_code(row: &sqlx::sqlite::SqliteRow) -> Result<OneTimeCode, NestaError> {
    let expires_at: String = row.try_get("expires_at").map_err(storage_err)?;
    let blocked_until: Option<String> = row.try_get("blocked_until").map_err(storage_err)?;
    let created_at: String = row.try_get("created_at").map_err(storage_err)?;

    Ok(OneTimeCode {
        id: row.try_get("id").map_err(storage_err)?,
        phone: row.try_get("phone").map_err(storage_err)?,
        code_hash: row.try_get("code_hash").map_err(storage_err)?,
        expires_at: parse_datetime(&expires_at)?,
        attempts: row.try_get("attempts").map_err(storage_err)?,
        blocked_until: parse_datetime_opt(blocked_until.as_deref())?,
        created_at: parse_datetime(&created_at)?,
    })
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn get_user_where(&self, where_clause: &str, bind_value: &str) -> NestaResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE {where_clause}");
        let row = sqlx::query(&sql)
            .bind(bind_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn ping(&self) -> NestaResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn create_user(&self, input: &CreateUserInput) -> NestaResult<User> {
        let result = sqlx::query(
            "INSERT INTO users (id, phone, role, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (phone) DO NOTHING",
        )
        .bind(&input.id)
        .bind(&input.phone)
        .bind(input.role.as_str())
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            tracing::debug!(phone = %input.phone, "user already existed, reusing");
        }

        self.get_user_by_phone(&input.phone)
            .await?
            .ok_or_else(|| NestaError::Storage("failed to retrieve user after creation".to_string()))
    }

    async fn get_user_by_id(&self, id: &str) -> NestaResult<Option<User>> {
        self.get_user_where("id = ?", id).await
    }

    async fn get_user_by_phone(&self, phone: &str) -> NestaResult<Option<User>> {
        self.get_user_where("phone = ?", phone).await
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> NestaResult<User> {
        let result = sqlx::query(
            "UPDATE users
             SET name = COALESCE(?, name),
                 email = COALESCE(?, email),
                 default_address_json = COALESCE(?, default_address_json)
             WHERE id = ?",
        )
        .bind(update.name.as_deref())
        .bind(update.email.as_deref())
        .bind(update.default_address.as_ref().map(Json))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(NestaError::NotFound(format!("user {id}")));
        }
        self.get_user_by_id(id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("user {id}")))
    }

    async fn create_code(&self, code: &OneTimeCode, min_interval: Duration) -> NestaResult<()> {
        // The write lock is taken before the latest code is read, so two
        // senders for one phone cannot both pass the window check.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_err)?;

        let sql = format!("{CODE_SELECT} {LATEST_CODE_WHERE}");
        let latest = sqlx::query(&sql)
            .bind(&code.phone)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if let Some(ref row) = latest {
            row_to_code(row)?.ensure_replaceable(code.created_at, min_interval)?;
        }

        sqlx::query(
            "INSERT INTO otp_codes (id, phone, code_hash, expires_at, attempts, blocked_until, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code.id)
        .bind(&code.phone)
        .bind(&code.code_hash)
        .bind(format_datetime(&code.expires_at))
        .bind(code.attempts)
        .bind(format_datetime_opt(&code.blocked_until))
        .bind(format_datetime(&code.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn latest_code(&self, phone: &str) -> NestaResult<Option<OneTimeCode>> {
        let sql = format!("{CODE_SELECT} {LATEST_CODE_WHERE}");
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(ref r) => Ok(Some(row_to_code(r)?)),
            None => Ok(None),
        }
    }

    async fn claim_attempt(
        &self,
        id: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> NestaResult<Option<i32>> {
        // Right-hand expressions see the pre-update row.
        let row = sqlx::query(
            "UPDATE otp_codes
             SET attempts = attempts + 1,
                 blocked_until = CASE WHEN attempts + 1 >= ? THEN ? ELSE blocked_until END
             WHERE id = ? AND attempts < ? AND (blocked_until IS NULL OR blocked_until <= ?)
             RETURNING attempts",
        )
        .bind(max_attempts)
        .bind(format_datetime(&blocked_until))
        .bind(id)
        .bind(max_attempts)
        .bind(format_datetime(&now))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        if let Some(row) = row {
            return Ok(Some(row.try_get("attempts").map_err(storage_err)?));
        }
        let exists = sqlx::query("SELECT 1 FROM otp_codes WHERE id = ?")
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
            "UPDATE otp_codes SET attempts = MAX(attempts - 1, 0), blocked_until = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn create_refresh_token(&self, token: &RefreshTokenRecord) -> NestaResult<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token, expires_at, revoked_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.id)
        .bind(&token.user_id)
        .bind(&token.token)
        .bind(format_datetime(&token.expires_at))
        .bind(format_datetime_opt(&token.revoked_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> NestaResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, token, expires_at, revoked_at FROM refresh_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(ref r) => {
                let expires_at: String = r.try_get("expires_at").map_err(storage_err)?;
                let revoked_at: Option<String> = r.try_get("revoked_at").map_err(storage_err)?;
                Ok(Some(RefreshTokenRecord {
                    id: r.try_get("id").map_err(storage_err)?,
                    user_id: r.try_get("user_id").map_err(storage_err)?,
                    token: r.try_get("token").map_err(storage_err)?,
                    expires_at: parse_datetime(&expires_at)?,
                    revoked_at: parse_datetime_opt(revoked_at.as_deref())?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn revoke_refresh_token(
        &self,
        token: &str,
        revoked_at: DateTime<Utc>,
    ) -> NestaResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ? WHERE token = ? AND revoked_at IS NULL",
        )
        .bind(format_datetime(&revoked_at))
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}
