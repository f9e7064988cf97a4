//! Email configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::adapters::email::{ResendSettings, DEFAULT_API_BASE_URL};

use super::error::ValidationError;

/// Email configuration (Resend). Without an API key notifications are
/// only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: Option<SecretString>,

    /// From email address
    #[serde(default = "default_from_email")]
    pub from_email: String,

    /// From name
    #[serde(default = "default_from_name")]
    pub from_name: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Link in every notification where the user can update payment details
    #[serde(default = "default_billing_url")]
    pub billing_url: String,

    /// Product name used in subjects
    #[serde(default = "default_product_name")]
    pub product_name: String,
}

impl EmailConfig {
    /// Get formatted "From" header value
    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    /// Resend settings, or `None` if no API key is configured.
    pub fn resend_settings(&self) -> Option<ResendSettings> {
        self.resend_api_key.as_ref().map(|key| ResendSettings {
            api_key: key.clone(),
            from: self.from_header(),
            api_base_url: self.api_base_url.clone(),
            product_name: self.product_name.clone(),
            billing_url: self.billing_url.clone(),
        })
    }

    /// Validate email configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(key) = &self.resend_api_key {
            if !key.expose_secret().starts_with("re_") {
                return Err(ValidationError::InvalidResendKey);
            }
            if !self.from_email.contains('@') {
                return Err(ValidationError::InvalidFromEmail);
            }
        }
        Ok(())
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            from_email: default_from_email(),
            from_name: default_from_name(),
            api_base_url: default_api_base_url(),
            billing_url: default_billing_url(),
            product_name: default_product_name(),
        }
    }
}

fn default_from_email() -> String {
    "billing@example.com".to_string()
}

fn default_from_name() -> String {
    "Billing".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_billing_url() -> String {
    "http://localhost:3000/billing".to_string()
}

fn default_product_name() -> String {
    "Example".to_string()
}
