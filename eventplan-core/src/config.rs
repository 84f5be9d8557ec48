use std::env;

use chrono::{FixedOffset, Offset, Utc};

use crate::errors::{ConfigError, PlannerError};

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Global configuration shared across the services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub database_url: String,
    pub environment: Environment,
    pub service_name: String,
    pub http_bind: Option<String>,
    /// Offset applied to UTC to obtain the wall clock events are planned in.
    pub utc_offset_minutes: i32,
}

impl CoreConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("")
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `TIMELINE_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let key = |suffix: &str| format!("{}{}", prefix, suffix);

        let db_key = key("DATABASE_URL");
        let database_url =
            env::var(&db_key).map_err(|_| ConfigError::MissingEnvVar(db_key.clone()))?;

        let environment = env::var(key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let service_name =
            env::var(key("SERVICE_NAME")).unwrap_or_else(|_| "eventplan".to_string());
        let http_bind = env::var(key("HTTP_BIND")).ok();

        let offset_key = key("UTC_OFFSET_MINUTES");
        let utc_offset_minutes = match env::var(&offset_key) {
            Ok(raw) => parse_offset(&offset_key, &raw)?,
            Err(_) => 0,
        };

        Ok(Self {
            database_url,
            environment,
            service_name,
            http_bind,
            utc_offset_minutes,
        })
    }

    /// Returns the base Postgres URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }

    /// Fixed offset of the planning wall clock.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_offset(key: &str, raw: &str) -> Result<i32, ConfigError> {
    let invalid = || ConfigError::InvalidEnvVar {
        key: key.to_string(),
        value: raw.to_string(),
    };
    let minutes: i32 = raw.trim().parse().map_err(|_| invalid())?;
    if minutes.abs() >= 24 * 60 {
        return Err(invalid());
    }
    Ok(minutes)
}

/// Helper that loads config and converts to the canonical error type.
pub fn load_core_config() -> Result<CoreConfig, PlannerError> {
    Ok(CoreConfig::from_env()?)
}
