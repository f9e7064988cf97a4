//! Payment-gateway webhook envelope.
//!
//! The wire format is camelCase JSON. Fields that only matter for failures
//! (amount, currency, invoice) are optional on the wire and checked when
//! the envelope is turned into a [`GatewayCommand`].

use serde::{Deserialize, Serialize};

use crate::domain::dunning::DunningMetadata;
use crate::domain::foundation::{EventId, Money, SubscriptionId, Timestamp, UserId};

use super::WebhookError;

/// Raw event envelope as posted by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    pub event_id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub subscription_id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub invoice_ref: Option<String>,

    /// Minor units.
    #[serde(default)]
    pub amount: Option<i64>,

    #[serde(default)]
    pub currency: Option<String>,

    pub occurred_at: Timestamp,

    #[serde(default)]
    pub attempt_count: Option<u32>,

    #[serde(default)]
    pub next_retry_at: Option<Timestamp>,
}

/// Event types the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventType {
    PaymentFailed,
    PaymentRecovered,
    Unknown(String),
}

impl GatewayEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "payment.failed" | "invoice.payment_failed" => GatewayEventType::PaymentFailed,
            "payment.recovered" | "payment.succeeded" | "invoice.payment_succeeded" => {
                GatewayEventType::PaymentRecovered
            }
            other => GatewayEventType::Unknown(other.to_string()),
        }
    }
}

/// A validated event, ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    PaymentFailed {
        event_id: EventId,
        subscription_id: SubscriptionId,
        user_id: UserId,
        amount_due: Money,
        gateway_invoice_ref: String,
        metadata: DunningMetadata,
    },
    PaymentRecovered {
        event_id: EventId,
        subscription_id: SubscriptionId,
    },
    /// Recognized envelope, unhandled type; acknowledged and dropped.
    Ignored {
        event_id: EventId,
        event_type: String,
    },
}

impl GatewayEvent {
    pub fn event_type(&self) -> GatewayEventType {
        GatewayEventType::parse(&self.event_type)
    }

    /// Validates the envelope for its type.
    pub fn into_command(self) -> Result<GatewayCommand, WebhookError> {
        let event_id =
            EventId::new(self.event_id.clone()).map_err(|_| WebhookError::MissingField("eventId"))?;

        match self.event_type() {
            GatewayEventType::Unknown(event_type) => Ok(GatewayCommand::Ignored {
                event_id,
                event_type,
            }),
            GatewayEventType::PaymentRecovered => Ok(GatewayCommand::PaymentRecovered {
                event_id,
                subscription_id: required_subscription(self.subscription_id)?,
            }),
            GatewayEventType::PaymentFailed => {
                let subscription_id = required_subscription(self.subscription_id)?;
                let user_id = self
                    .user_id
                    .and_then(|u| UserId::new(u).ok())
                    .ok_or(WebhookError::MissingField("userId"))?;
                let gateway_invoice_ref = self
                    .invoice_ref
                    .filter(|r| !r.trim().is_empty())
                    .ok_or(WebhookError::MissingField("invoiceRef"))?;
                let amount = self.amount.ok_or(WebhookError::MissingField("amount"))?;
                let currency = self.currency.ok_or(WebhookError::MissingField("currency"))?;
                let amount_due = Money::new(amount, currency)
                    .map_err(|e| WebhookError::ParseError(e.to_string()))?;

                Ok(GatewayCommand::PaymentFailed {
                    event_id,
                    subscription_id,
                    user_id,
                    amount_due,
                    gateway_invoice_ref,
                    metadata: DunningMetadata {
                        attempt_count: self.attempt_count,
                        next_gateway_retry_at: self.next_retry_at,
                        last_reminder_sent_at: None,
                    },
                })
            }
        }
    }
}

fn required_subscription(value: Option<String>) -> Result<SubscriptionId, WebhookError> {
    value
        .and_then(|s| SubscriptionId::new(s).ok())
        .ok_or(WebhookError::MissingField("subscriptionId"))
}
