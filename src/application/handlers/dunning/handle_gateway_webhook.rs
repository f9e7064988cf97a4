//! HandleGatewayWebhookHandler - verifies a gateway delivery and routes it to the engine.

use std::sync::Arc;

use crate::application::dunning_engine::{
    DunningEngine, PaymentFailedCommand, PaymentFailedOutcome, PaymentRecoveredOutcome,
};
use crate::domain::foundation::DunningRecordId;
use crate::domain::gateway::{GatewayCommand, WebhookError, WebhookVerifier};
use crate::ports::Clock;

/// Command to handle one webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleGatewayWebhookCommand {
    /// Raw request body, exactly as signed.
    pub payload: Vec<u8>,
    /// Value of the signature header.
    pub signature: String,
}

/// What the delivery did. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleGatewayWebhookResult {
    DunningOpened { record_id: DunningRecordId },
    AlreadyInRecovery { record_id: DunningRecordId },
    InvoiceAlreadyCanceled { record_id: DunningRecordId },
    Recovered { record_id: DunningRecordId },
    NoActiveRecord,
    /// Event id seen before.
    Duplicate,
    /// Unhandled event type.
    Ignored { event_type: String },
}

impl HandleGatewayWebhookResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DunningOpened { .. } => "dunning_opened",
            Self::AlreadyInRecovery { .. } => "already_in_recovery",
            Self::InvoiceAlreadyCanceled { .. } => "invoice_already_canceled",
            Self::Recovered { .. } => "recovered",
            Self::NoActiveRecord => "no_active_record",
            Self::Duplicate => "duplicate",
            Self::Ignored { .. } => "ignored",
        }
    }
}

pub struct HandleGatewayWebhookHandler {
    verifier: Arc<WebhookVerifier>,
    engine: Arc<DunningEngine>,
    clock: Arc<dyn Clock>,
}

impl HandleGatewayWebhookHandler {
    pub fn new(
        verifier: Arc<WebhookVerifier>,
        engine: Arc<DunningEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            engine,
            clock,
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleGatewayWebhookCommand,
    ) -> Result<HandleGatewayWebhookResult, WebhookError> {
        // 1. Verify before parsing anything
        let event = self
            .verifier
            .verify_and_parse(&cmd.payload, &cmd.signature, self.clock.now())
            .map_err(|e| {
                tracing::warn!(error = %e, "Rejected gateway webhook");
                e
            })?;

        // 2. Validate the envelope for its type
        let command = event.into_command()?;

        // 3. Route
        match command {
            GatewayCommand::PaymentFailed {
                event_id,
                subscription_id,
                user_id,
                amount_due,
                gateway_invoice_ref,
                metadata,
            } => {
                let outcome = self
                    .engine
                    .on_payment_failed(PaymentFailedCommand {
                        event_id,
                        subscription_id,
                        user_id,
                        amount_due,
                        gateway_invoice_ref,
                        metadata,
                    })
                    .await?;

                Ok(match outcome {
                    PaymentFailedOutcome::Opened { record_id } => {
                        HandleGatewayWebhookResult::DunningOpened { record_id }
                    }
                    PaymentFailedOutcome::Duplicate => HandleGatewayWebhookResult::Duplicate,
                    PaymentFailedOutcome::AlreadyInRecovery { record_id } => {
                        HandleGatewayWebhookResult::AlreadyInRecovery { record_id }
                    }
                    PaymentFailedOutcome::InvoiceAlreadyCanceled { record_id } => {
                        HandleGatewayWebhookResult::InvoiceAlreadyCanceled { record_id }
                    }
                })
            }
            GatewayCommand::PaymentRecovered {
                event_id,
                subscription_id,
            } => {
                let outcome = self
                    .engine
                    .on_payment_recovered(&subscription_id, &event_id)
                    .await?;

                Ok(match outcome {
                    PaymentRecoveredOutcome::Recovered { record_id } => {
                        HandleGatewayWebhookResult::Recovered { record_id }
                    }
                    PaymentRecoveredOutcome::Duplicate => HandleGatewayWebhookResult::Duplicate,
                    PaymentRecoveredOutcome::NoActiveRecord => {
                        HandleGatewayWebhookResult::NoActiveRecord
                    }
                })
            }
            GatewayCommand::Ignored {
                event_id,
                event_type,
            } => {
                tracing::debug!(event_id = %event_id, event_type = %event_type, "Ignoring gateway event type");
                Ok(HandleGatewayWebhookResult::Ignored { event_type })
            }
        }
    }
}
