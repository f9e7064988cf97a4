//! Gateway webhook configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Webhook signature verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret (`whsec_...`)
    pub signing_secret: SecretString,

    /// Maximum age of a signature timestamp, in seconds
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: i64,
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let secret = self.signing_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK__SIGNING_SECRET"));
        }
        if !secret.starts_with("whsec_") || secret.len() <= "whsec_".len() {
            return Err(ValidationError::InvalidWebhookSecret);
        }
        if !(1..=3600).contains(&self.tolerance_secs) {
            return Err(ValidationError::InvalidWebhookTolerance);
        }
        Ok(())
    }
}

fn default_tolerance() -> i64 {
    300
}
