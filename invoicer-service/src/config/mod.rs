//! Configuration module for invoicer-service.

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct InvoicerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub billing: BillingDefaults,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct BillingDefaults {
    /// VAT percent applied when neither the request nor the profile sets one.
    pub default_vat_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
}

const MIN_JWT_SECRET_LEN: usize = 16;

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl InvoicerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("JWT_SECRET is required")))?;

        let config = Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "invoicer-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            jwt: JwtConfig {
                secret: Secret::new(jwt_secret),
                expiry_days: parse_or("JWT_EXPIRY_DAYS", 7)?,
            },
            billing: BillingDefaults {
                default_vat_rate: parse_or("DEFAULT_VAT_RATE", Decimal::from(17))?,
            },
            security: SecurityConfig {
                allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_or("LOGIN_RATE_LIMIT", 10)?,
                login_window_seconds: parse_or("LOGIN_RATE_WINDOW_SECONDS", 60)?,
                register_attempts: parse_or("REGISTER_RATE_LIMIT", 5)?,
                register_window_seconds: parse_or("REGISTER_RATE_WINDOW_SECONDS", 3600)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run safely with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt.secret.expose_secret().len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )));
        }
        if self.jwt.expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_DAYS must be positive"
            )));
        }
        if self.billing.default_vat_rate < Decimal::ZERO
            || self.billing.default_vat_rate > Decimal::ONE_HUNDRED
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_VAT_RATE must be between 0 and 100"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(database_url: &str) -> InvoicerConfig {
    InvoicerConfig {
        common: core_config::Config {
            port: 0,
            ..Default::default()
        },
        service_name: "invoicer-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url.to_string(),
            max_connections: 2,
            min_connections: 0,
        },
        jwt: JwtConfig {
            secret: Secret::new("unit-test-secret-0123456789".to_string()),
            expiry_days: 7,
        },
        billing: BillingDefaults {
            default_vat_rate: Decimal::from(17),
        },
        security: SecurityConfig {
            allowed_origins: vec!["*".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 10,
            login_window_seconds: 60,
            register_attempts: 5,
            register_window_seconds: 3600,
        },
    }
}
