use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

use crate::types::LocationStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct NestaConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deployment environment. `development` selects human-readable logs.
    #[serde(default = "default_env")]
    pub env: String,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub locations: LocationConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// One-time code and session token settings. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: i64,
    #[serde(default = "default_otp_ttl")]
    pub otp_ttl_secs: i64,
    #[serde(default = "default_otp_rate_limit")]
    pub otp_rate_limit_secs: i64,
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Status assigned to a location once its verified request count reaches the threshold.
    #[serde(default = "default_threshold_status")]
    pub threshold_status: LocationStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_period_days")]
    pub period_days: i64,
}

impl AuthConfig {
    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_ttl_secs)
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp_ttl_secs)
    }

    pub fn otp_rate_limit(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp_rate_limit_secs)
    }
}

impl BillingConfig {
    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::days(self.period_days)
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            threshold_status: default_threshold_status(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_env() -> String {
    "development".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_access_ttl() -> i64 {
    15 * 60
}

fn default_refresh_ttl() -> i64 {
    30 * 24 * 60 * 60
}

fn default_otp_ttl() -> i64 {
    5 * 60
}

fn default_otp_rate_limit() -> i64 {
    60
}

fn default_otp_max_attempts() -> i32 {
    5
}

fn default_threshold_status() -> LocationStatus {
    LocationStatus::Planned
}

fn default_period_days() -> i64 {
    30
}

impl NestaConfig {
    pub fn load(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("NESTA_").split("__"))
            .extract()
    }

    pub fn is_development(&self) -> bool {
        self.env == "development"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_fill_missing_fields() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nesta.toml",
                r#"
                [database]
                url = "sqlite://nesta.db"

                [auth]
                jwt_secret = "secret"
                "#,
            )?;
            let config = NestaConfig::load("nesta.toml")?;
            assert_eq!(config.port, 8080);
            assert!(config.is_development());
            assert_eq!(config.database.max_connections, 10);
            assert_eq!(config.auth.access_ttl(), chrono::Duration::minutes(15));
            assert_eq!(config.auth.refresh_ttl(), chrono::Duration::days(30));
            assert_eq!(config.auth.otp_ttl(), chrono::Duration::minutes(5));
            assert_eq!(config.auth.otp_rate_limit(), chrono::Duration::minutes(1));
            assert_eq!(config.auth.otp_max_attempts, 5);
            assert_eq!(config.locations.threshold_status, LocationStatus::Planned);
            assert_eq!(config.billing.period(), chrono::Duration::days(30));
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nesta.toml",
                r#"
                port = 9000

                [database]
                url = "sqlite://nesta.db"

                [auth]
                jwt_secret = "from-file"
                "#,
            )?;
            jail.set_env("NESTA_AUTH__JWT_SECRET", "from-env");
            jail.set_env("NESTA_AUTH__OTP_MAX_ATTEMPTS", "3");
            jail.set_env("NESTA_LOCATIONS__THRESHOLD_STATUS", "ACTIVE");
            let config = NestaConfig::load("nesta.toml")?;
            assert_eq!(config.port, 9000);
            assert_eq!(config.auth.jwt_secret, "from-env");
            assert_eq!(config.auth.otp_max_attempts, 3);
            assert_eq!(config.locations.threshold_status, LocationStatus::Active);
            Ok(())
        });
    }

    #[test]
    fn missing_secret_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("nesta.toml", "[database]\nurl = \"sqlite://nesta.db\"\n")?;
            assert!(NestaConfig::load("nesta.toml").is_err());
            Ok(())
        });
    }
}
