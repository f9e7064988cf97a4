//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `DUNNING` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use dunning::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod database;
mod dunning;
mod email;
mod error;
mod scheduler;
mod server;
mod webhook;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use dunning::DunningConfig;
pub use email::EmailConfig;
pub use error::{ConfigError, ValidationError};
pub use scheduler::SchedulerConfig;
pub use server::{Environment, ServerConfig};
pub use webhook::WebhookConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL connection; absent means in-memory stores
    pub database: Option<DatabaseConfig>,

    /// Gateway webhook signature settings
    pub webhook: WebhookConfig,

    /// Operator JWT settings
    pub auth: AuthConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Stage offsets and downgrade role
    #[serde(default)]
    pub dunning: DunningConfig,

    /// Email configuration (Resend)
    #[serde(default)]
    pub email: EmailConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `DUNNING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `DUNNING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `DUNNING__WEBHOOK__SIGNING_SECRET=...` -> `webhook.signing_secret = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("DUNNING")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        match &self.database {
            Some(database) => database.validate()?,
            None if self.is_production() => {
                return Err(ValidationError::DatabaseRequiredInProduction)
            }
            None => {}
        }
        self.webhook.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.scheduler.validate()?;
        self.dunning.validate()?;
        self.email.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
