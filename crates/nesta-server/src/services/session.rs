use std::sync::Arc;

use chrono::{DateTime, Utc};
use nesta_core::{
    CreateUserInput, CredentialStore, NestaConfig, NestaError, NestaResult, OneTimeCode,
    Principal, ProfileUpdate, RefreshTokenRecord, Role, User,
};
use nesta_crypto::{Claims, generate_code, hash_code, issue_token, new_id, new_secret};
use serde::Serialize;

/// A freshly generated code, returned for out-of-band delivery.
#[derive(Debug, Clone)]
pub struct CodeIssued {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry of the access token.
    pub expires_at: DateTime<Utc>,
}

/// One-time-code login and refresh-token sessions.
pub struct SessionAuthority<C: CredentialStore> {
    store: Arc<C>,
    config: Arc<NestaConfig>,
}

impl<C: CredentialStore> SessionAuthority<C> {
    pub fn new(store: Arc<C>, config: Arc<NestaConfig>) -> Self {
        Self { store, config }
    }

    pub async fn send_code(&self, phone: &str) -> NestaResult<CodeIssued> {
        let phone = normalize_phone(phone)?;
        let auth = &self.config.auth;
        let now = Utc::now();

        let code = generate_code();
        let expires_at = now + auth.otp_ttl();
        self.store
            .create_code(
                &OneTimeCode {
                    id: new_id(),
                    phone: phone.to_string(),
                    code_hash: hash_code(&code),
                    expires_at,
                    attempts: 0,
                    blocked_until: None,
                    created_at: now,
                },
                auth.otp_rate_limit(),
            )
            .await?;

        tracing::info!(phone, %expires_at, "one-time code issued");
        Ok(CodeIssued { code, expires_at })
    }

    /// Check `code` against the phone's latest code. Each comparison first
    /// reserves an attempt in the store, so parallel guesses share one budget.
    pub async fn verify_code(&self, phone: &str, code: &str) -> NestaResult<TokenPair> {
        let phone = normalize_phone(phone)?;
        let auth = &self.config.auth;
        let now = Utc::now();

        let latest = self
            .store
            .latest_code(phone)
            .await?
            .ok_or_else(|| NestaError::NotFound("one-time code".to_string()))?;

        if let Some(until) = latest.blocked_at(now) {
            return Err(NestaError::Blocked { until });
        }
        if latest.is_expired_at(now) {
            return Err(NestaError::CodeExpired);
        }

        let claimed = self
            .store
            .claim_attempt(&latest.id, auth.otp_max_attempts, now, now + auth.otp_ttl())
            .await?;
        let Some(attempts) = claimed else {
            let until = self
                .store
                .latest_code(phone)
                .await?
                .and_then(|current| current.blocked_at(now))
                .unwrap_or(now + auth.otp_ttl());
            return Err(NestaError::Blocked { until });
        };

        if hash_code(code.trim()) != latest.code_hash {
            if attempts >= auth.otp_max_attempts {
                tracing::warn!(phone, attempts, "too many failed attempts, phone blocked");
            }
            return Err(NestaError::InvalidCode);
        }
        self.store.release_attempt(&latest.id).await?;

        let user = match self.store.get_user_by_phone(phone).await? {
            Some(user) => user,
            None => {
                let user = self
                    .store
                    .create_user(&CreateUserInput {
                        id: new_id(),
                        phone: phone.to_string(),
                        role: Role::User,
                    })
                    .await?;
                tracing::info!(user_id = %user.id, "user registered");
                user
            }
        };

        self.issue_pair(&user).await
    }

    /// Issue a new pair for the owner of `refresh_token`. The presented token
    /// stays valid until it expires or is logged out.
    pub async fn refresh(&self, refresh_token: &str) -> NestaResult<TokenPair> {
        let record = self
            .store
            .get_refresh_token(refresh_token)
            .await?
            .ok_or(NestaError::InvalidRefreshToken)?;

        if record.revoked_at.is_some() {
            return Err(NestaError::RefreshTokenRevoked);
        }
        if record.expires_at < Utc::now() {
            return Err(NestaError::RefreshTokenExpired);
        }

        let user = self
            .store
            .get_user_by_id(&record.user_id)
            .await?
            .ok_or(NestaError::InvalidRefreshToken)?;

        self.issue_pair(&user).await
    }

    /// Revoke a refresh token. Unknown and already-revoked tokens succeed
    /// silently so the response does not reveal whether a token existed.
    pub async fn logout(&self, refresh_token: &str) -> NestaResult<()> {
        let revoked = self
            .store
            .revoke_refresh_token(refresh_token, Utc::now())
            .await?;
        tracing::debug!(revoked, "logout");
        Ok(())
    }

    pub async fn current_user(&self, principal: &Principal) -> NestaResult<User> {
        self.store
            .get_user_by_id(&principal.user_id)
            .await?
            .ok_or_else(|| NestaError::NotFound(format!("user {}", principal.user_id)))
    }

    /// Update the caller's own profile. Blank strings are rejected rather
    /// than stored.
    pub async fn update_profile(
        &self,
        principal: &Principal,
        mut update: ProfileUpdate,
    ) -> NestaResult<User> {
        if let Some(name) = update.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(NestaError::Validation("name must not be blank".to_string()));
            }
        }
        if let Some(email) = update.email.as_mut() {
            *email = email.trim().to_string();
            if !is_plausible_email(email) {
                return Err(NestaError::Validation("invalid email".to_string()));
            }
        }
        if let Some(address) = &update.default_address {
            if !address.is_object() {
                return Err(NestaError::Validation(
                    "default_address_json must be an object".to_string(),
                ));
            }
        }

        let user = self.store.update_profile(&principal.user_id, &update).await?;
        tracing::info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    async fn issue_pair(&self, user: &User) -> NestaResult<TokenPair> {
        let auth = &self.config.auth;
        let now = Utc::now();
        let expires_at = now + auth.access_ttl();

        let claims = Claims::new(&user.id, user.role, now, expires_at, &new_id());
        let access_token = issue_token(&claims, &auth.jwt_secret)?;

        let refresh_token = new_secret();
        self.store
            .create_refresh_token(&RefreshTokenRecord {
                id: new_id(),
                user_id: user.id.clone(),
                token: refresh_token.clone(),
                expires_at: now + auth.refresh_ttl(),
                revoked_at: None,
            })
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

fn normalize_phone(phone: &str) -> NestaResult<&str> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err(NestaError::Validation("phone is required".to_string()));
    }
    Ok(phone)
}
