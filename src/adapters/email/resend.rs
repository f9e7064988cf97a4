//! Resend-backed NotificationGateway.
//!
//! Looks up the recipient in the user directory, renders the stage
//! template and posts it to the Resend API.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{Notification, NotificationGateway, UserDirectory};

use super::templates::{render, TemplateContext};

pub const DEFAULT_API_BASE_URL: &str = "https://api.resend.com";

#[derive(Debug, Clone)]
pub struct ResendSettings {
    pub api_key: SecretString,
    /// "Name <address>" header value.
    pub from: String,
    pub api_base_url: String,
    pub product_name: String,
    pub billing_url: String,
}

pub struct ResendNotificationGateway {
    client: Client,
    settings: ResendSettings,
    users: Arc<dyn UserDirectory>,
}

#[derive(Serialize)]
struct ResendReq<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl ResendNotificationGateway {
    pub fn new(settings: ResendSettings, users: Arc<dyn UserDirectory>) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| notification_failed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            settings,
            users,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.settings.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl NotificationGateway for ResendNotificationGateway {
    async fn send(&self, notification: &Notification) -> Result<(), DomainError> {
        let profile = self
            .users
            .find(&notification.user_id)
            .await?
            .ok_or_else(|| notification_failed(format!("Unknown user {}", notification.user_id)))?;
        let to = profile
            .email
            .as_deref()
            .filter(|e| e.contains('@'))
            .ok_or_else(|| notification_failed(format!("No email for user {}", notification.user_id)))?;

        let email = render(
            notification,
            &TemplateContext {
                recipient_name: profile.display_name.as_deref(),
                product_name: &self.settings.product_name,
                billing_url: &self.settings.billing_url,
            },
        );

        let body = ResendReq {
            from: &self.settings.from,
            to: [to],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        self.client
            .post(self.endpoint())
            .bearer_auth(self.settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| notification_failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| notification_failed(e.to_string()))?;

        tracing::debug!(
            record_id = %notification.record_id,
            stage = %notification.stage,
            "Dunning email sent"
        );
        Ok(())
    }
}

fn notification_failed(message: impl Into<String>) -> DomainError {
    DomainError::new(ErrorCode::NotificationFailed, message)
}
