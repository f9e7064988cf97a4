//! Operator authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// HS256 JWT settings for the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC key operator tokens are signed with
    pub jwt_secret: SecretString,

    /// Expected `iss` claim, if any
    pub issuer: Option<String>,

    /// Role claim an operator token must carry
    #[serde(default = "default_operator_role")]
    pub operator_role: String,
}

impl AuthConfig {
    /// Validate authentication configuration
    ///
    /// In production the secret must be at least 32 bytes.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        if self.operator_role.trim().is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__OPERATOR_ROLE"));
        }
        if *environment == Environment::Production && secret.len() < 32 {
            return Err(ValidationError::JwtSecretTooShort);
        }
        Ok(())
    }
}

fn default_operator_role() -> String {
    "operator".to_string()
}
